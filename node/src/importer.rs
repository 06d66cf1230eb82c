//! Transaction-id audit import.
//!
//! Reads a chain export (`u32 BE length || block bytes`, repeated, genesis
//! omitted so the first record is height 2), verifies every block and
//! records the id of each transaction with the height it was first seen at.
//! A repeated id is an anomaly: it is reported and never overwrites the
//! first sighting.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use wavelet_ledger::{Block, TransactionRef};
use wavelet_store::{TxIdRecord, TxIdStore};
use wavelet_types::TxId;

use crate::NodeError;

/// Height of the first record in an export.
const FIRST_EXPORTED_HEIGHT: u64 = 2;
const MAX_RECORD_SIZE: u32 = 16 * 1024 * 1024;

/// A transaction id seen at two heights.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateAlarm {
    pub id: TxId,
    pub first_seen: u64,
    pub height: u64,
}

/// A transaction matching the type filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedTransaction {
    pub id: TxId,
    pub height: u64,
    pub tx_type: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Blocks verified and recorded in this run.
    pub blocks: u64,
    /// Records below the persisted import height.
    pub skipped: u64,
    pub transactions: u64,
    pub alarms: Vec<DuplicateAlarm>,
    pub matching: Vec<MatchedTransaction>,
    /// Height of the first block whose signature did not verify.
    pub invalid_at: Option<u64>,
    pub last_height: u64,
}

pub struct Importer<'a, S: ?Sized> {
    store: &'a S,
    type_filter: Option<u8>,
}

impl<'a, S: TxIdStore + ?Sized> Importer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            type_filter: None,
        }
    }

    /// Also report every transaction of type `tx_type`.
    pub fn with_type_filter(mut self, tx_type: u8) -> Self {
        self.type_filter = Some(tx_type);
        self
    }

    pub fn import_file(&self, path: &Path) -> Result<ImportReport, NodeError> {
        let file = File::open(path)?;
        self.import(BufReader::new(file))
    }

    pub fn import<R: Read>(&self, mut reader: R) -> Result<ImportReport, NodeError> {
        let resume_after = self.store.import_height()?;
        let mut report = ImportReport {
            last_height: resume_after,
            ..ImportReport::default()
        };
        tracing::info!(resume_after, "starting import");

        let mut height = FIRST_EXPORTED_HEIGHT;
        while let Some(len) = read_length(&mut reader)? {
            if len > MAX_RECORD_SIZE {
                return Err(NodeError::Import(format!(
                    "record at height {height} claims {len} bytes"
                )));
            }
            let mut bytes = vec![0u8; len as usize];
            reader.read_exact(&mut bytes).map_err(|e| {
                NodeError::Import(format!("truncated record at height {height}: {e}"))
            })?;

            if height <= resume_after {
                report.skipped += 1;
                height += 1;
                continue;
            }

            let block = Block::from_bytes(&bytes)?;
            if let Err(e) = block.ensure_valid_signature() {
                tracing::error!(height, error = %e, "stopping import at invalid block");
                report.invalid_at = Some(height);
                break;
            }
            self.record_block(&block, height, &mut report)?;
            self.store.set_import_height(height)?;
            report.blocks += 1;
            report.last_height = height;
            height += 1;
        }

        tracing::info!(
            blocks = report.blocks,
            skipped = report.skipped,
            transactions = report.transactions,
            alarms = report.alarms.len(),
            last_height = report.last_height,
            "import finished"
        );
        Ok(report)
    }

    fn record_block(
        &self,
        block: &Block,
        height: u64,
        report: &mut ImportReport,
    ) -> Result<(), NodeError> {
        for bytes in &block.transactions {
            let tx = TransactionRef::new(bytes);
            report.transactions += 1;

            if let TxIdRecord::Duplicate { first_seen } = self.store.record_tx_id(&tx.id, height)? {
                tracing::error!(
                    id = %tx.id,
                    first_seen,
                    height,
                    signature = %block.signature,
                    "duplicate transaction id"
                );
                report.alarms.push(DuplicateAlarm {
                    id: tx.id,
                    first_seen,
                    height,
                });
            }

            if let (Some(wanted), Some(tx_type)) = (self.type_filter, tx.tx_type()) {
                if wanted == tx_type {
                    tracing::info!(
                        id = %tx.id,
                        height,
                        tx_type,
                        "matching transaction"
                    );
                    report.matching.push(MatchedTransaction {
                        id: tx.id,
                        height,
                        tx_type,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Next record length, or `None` at a clean end of input.
fn read_length<R: Read>(reader: &mut R) -> Result<Option<u32>, NodeError> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(NodeError::Import("truncated record length".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(u32::from_be_bytes(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavelet_crypto::keypair_from_seed;
    use wavelet_ledger::{create_genesis_block, BlockBuilder, GenesisConfig};
    use wavelet_nullables::NullStore;
    use wavelet_types::{KeyPair, Signature, Timestamp};

    fn keypair() -> KeyPair {
        keypair_from_seed(&[21u8; 32])
    }

    /// Blocks after genesis, one per entry of `txs`.
    fn blocks(kp: &KeyPair, txs: &[Vec<Vec<u8>>]) -> Vec<Block> {
        let genesis = create_genesis_block(GenesisConfig {
            generator: kp,
            timestamp: Timestamp::new(1),
            transactions: Vec::new(),
        });
        let mut parent = genesis.signature;
        let mut out = Vec::new();
        for (i, block_txs) in txs.iter().enumerate() {
            let mut builder = BlockBuilder::new(parent).timestamp(Timestamp::new(2 + i as u64));
            for tx in block_txs {
                builder = builder.transaction(tx.clone());
            }
            let block = builder.sign(kp);
            parent = block.signature;
            out.push(block);
        }
        out
    }

    fn export(blocks: &[Block]) -> Vec<u8> {
        let mut out = Vec::new();
        for block in blocks {
            let bytes = block.to_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }

    #[test]
    fn records_ids_at_their_heights() {
        let kp = keypair();
        let chain = blocks(&kp, &[vec![vec![4, 1]], vec![vec![4, 2], vec![0, 16, 9]]]);
        let store = NullStore::new();
        let report = Importer::new(&store).import(&export(&chain)[..]).unwrap();

        assert_eq!(report.blocks, 2);
        assert_eq!(report.transactions, 3);
        assert_eq!(report.last_height, 3);
        assert!(report.alarms.is_empty());
        let id = wavelet_crypto::transaction_id(&[4, 2]);
        assert_eq!(store.tx_id_height(&id).unwrap(), Some(3));
        assert_eq!(store.import_height().unwrap(), 3);
    }

    #[test]
    fn duplicate_id_raises_alarm_and_keeps_first_height() {
        let kp = keypair();
        let chain = blocks(&kp, &[vec![vec![4, 7]], vec![vec![4, 8]], vec![vec![4, 7]]]);
        let store = NullStore::new();
        let report = Importer::new(&store).import(&export(&chain)[..]).unwrap();

        let id = wavelet_crypto::transaction_id(&[4, 7]);
        assert_eq!(
            report.alarms,
            vec![DuplicateAlarm {
                id,
                first_seen: 2,
                height: 4
            }]
        );
        assert_eq!(store.tx_id_height(&id).unwrap(), Some(2));
    }

    #[test]
    fn resumes_after_persisted_height() {
        let kp = keypair();
        let chain = blocks(&kp, &[vec![vec![4, 1]], vec![vec![4, 2]], vec![vec![4, 3]]]);
        let store = NullStore::new();
        Importer::new(&store).import(&export(&chain[..2])[..]).unwrap();

        let report = Importer::new(&store).import(&export(&chain)[..]).unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.blocks, 1);
        assert!(report.alarms.is_empty());
        assert_eq!(store.import_height().unwrap(), 4);
    }

    #[test]
    fn stops_at_first_invalid_signature() {
        let kp = keypair();
        let mut chain = blocks(&kp, &[vec![vec![4, 1]], vec![vec![4, 2]], vec![vec![4, 3]]]);
        chain[1].signature = Signature([7u8; 64]);
        let store = NullStore::new();
        let report = Importer::new(&store).import(&export(&chain)[..]).unwrap();

        assert_eq!(report.blocks, 1);
        assert_eq!(report.invalid_at, Some(3));
        assert_eq!(store.import_height().unwrap(), 2);
        let after = wavelet_crypto::transaction_id(&[4, 3]);
        assert_eq!(store.tx_id_height(&after).unwrap(), None);
    }

    #[test]
    fn type_filter_reports_matches() {
        let kp = keypair();
        let chain = blocks(&kp, &[vec![vec![4, 1], vec![0, 16, 5], vec![16, 2]]]);
        let store = NullStore::new();
        let report = Importer::new(&store)
            .with_type_filter(16)
            .import(&export(&chain)[..])
            .unwrap();
        assert_eq!(report.matching.len(), 2);
        assert!(report.matching.iter().all(|m| m.tx_type == 16 && m.height == 2));
    }

    #[test]
    fn truncated_record_is_an_error() {
        let kp = keypair();
        let chain = blocks(&kp, &[vec![vec![4, 1]]]);
        let mut bytes = export(&chain);
        bytes.truncate(bytes.len() - 3);
        let store = NullStore::new();
        assert!(matches!(
            Importer::new(&store).import(&bytes[..]),
            Err(NodeError::Import(_))
        ));
    }

    #[test]
    fn empty_export_imports_nothing() {
        let store = NullStore::new();
        let report = Importer::new(&store).import(&[][..]).unwrap();
        assert_eq!(report, ImportReport::default());
    }

    #[test]
    fn imports_from_file() {
        let kp = keypair();
        let chain = blocks(&kp, &[vec![vec![4, 1]]]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.bin");
        std::fs::write(&path, export(&chain)).unwrap();
        let store = NullStore::new();
        let report = Importer::new(&store).import_file(&path).unwrap();
        assert_eq!(report.blocks, 1);
    }
}
