use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use wavelet_protocol::{decode_frame, DeclaredAddress, Handshake, Version};
use wavelet_types::{Scheme, Timestamp};

fn socket_addr() -> impl Strategy<Value = SocketAddr> {
    prop_oneof![
        (any::<[u8; 4]>(), any::<u16>())
            .prop_map(|(ip, port)| SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port)),
        (any::<[u8; 16]>(), any::<u16>())
            .prop_map(|(ip, port)| SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip)), port)),
    ]
}

fn handshake() -> impl Strategy<Value = Handshake> {
    (
        "[a-z]{1,32}",
        prop::sample::select(vec![Scheme::MAINNET, Scheme::TESTNET, Scheme::STAGENET]),
        (any::<u32>(), any::<u32>(), any::<u32>()),
        "[a-zA-Z0-9-]{0,64}",
        any::<u64>(),
        prop::option::of(socket_addr()),
        any::<u64>(),
    )
        .prop_map(
            |(application, scheme, (major, minor, patch), node_name, nonce, declared, ts)| {
                Handshake {
                    application,
                    scheme,
                    version: Version::new(major, minor, patch),
                    node_name,
                    nonce,
                    declared_address: DeclaredAddress(declared),
                    timestamp: Timestamp::new(ts),
                }
            },
        )
}

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(f)
}

proptest! {
    /// Any handshake we can write is read back unchanged.
    #[test]
    fn handshake_write_read(hs in handshake()) {
        let bytes = hs.to_bytes().unwrap();
        let decoded = block_on(Handshake::read_from(&mut bytes.as_slice())).unwrap();
        prop_assert_eq!(decoded, hs);
    }

    /// Every proper prefix of a handshake fails to decode.
    #[test]
    fn handshake_prefix_fails(hs in handshake(), cut in 0usize..1000) {
        let bytes = hs.to_bytes().unwrap();
        let cut = cut % bytes.len();
        prop_assert!(block_on(Handshake::read_from(&mut &bytes[..cut])).is_err());
    }

    /// Declared addresses always encode to 0, 8 or 20 bytes.
    #[test]
    fn declared_address_lengths(addr in prop::option::of(socket_addr())) {
        let len = DeclaredAddress(addr).to_bytes().len();
        prop_assert!(len == 0 || len == 8 || len == 20);
    }

    /// Arbitrary payload bytes never panic the frame decoder.
    #[test]
    fn frame_decoder_total(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_frame(&bytes);
    }
}
