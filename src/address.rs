//! Narrow contract for script-to-address parsing.
//!
//! Out of scope per spec.md §1: given a script, recognize the payment
//! address(es) it pays. A real implementation decodes network-specific
//! address formats; this crate only needs the seam (`AddressDecoder`) plus a
//! minimal reference implementation sufficient for unit tests.
use std::collections::HashSet;

/// A single recognized payment address kind, classified the way
/// [`crate::rescan::RescanKeys`] buckets them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// 20-byte RIPEMD-160 digest behind a pay-to-pubkey-hash script.
    P2pkh([u8; 20]),
    /// 20-byte RIPEMD-160 digest behind a pay-to-script-hash script.
    P2sh([u8; 20]),
    /// A recognized address variant not captured by the hash-based kinds
    /// above; compared as its encoded string form.
    Fallback(String),
}

pub trait AddressDecoder: Send + Sync {
    /// Extracts all payment addresses a script pays to. Most scripts pay a
    /// single address; a small number (e.g. bare multisig) pay several.
    fn extract_addresses(&self, pk_script: &[u8]) -> Vec<AddressKind>;

    /// Encodes an address kind to its canonical string form, used as the key
    /// into the router's `watchedAddresses` index.
    fn encode(&self, addr: &AddressKind) -> String;

    /// Decodes a caller-supplied address string (from `notifyreceived` or a
    /// rescan request) into its kind, if recognized.
    fn decode(&self, s: &str) -> Option<AddressKind>;
}

/// A reference decoder recognizing a minimal `p2pkh:<hex20>` /
/// `p2sh:<hex20>` / `<anything else>` scheme, sufficient to exercise the
/// router and rescan engine in tests without a real network's address
/// format.
#[derive(Default)]
pub struct TestAddressDecoder;

impl AddressDecoder for TestAddressDecoder {
    fn extract_addresses(&self, pk_script: &[u8]) -> Vec<AddressKind> {
        if pk_script.len() == 21 && pk_script[0] == 0x00 {
            let mut digest = [0u8; 20];
            digest.copy_from_slice(&pk_script[1..]);
            return vec![AddressKind::P2pkh(digest)];
        }

        if pk_script.len() == 21 && pk_script[0] == 0x01 {
            let mut digest = [0u8; 20];
            digest.copy_from_slice(&pk_script[1..]);
            return vec![AddressKind::P2sh(digest)];
        }

        Vec::new()
    }

    fn encode(&self, addr: &AddressKind) -> String {
        match addr {
            AddressKind::P2pkh(d) => format!("p2pkh:{}", hex::encode(d)),
            AddressKind::P2sh(d) => format!("p2sh:{}", hex::encode(d)),
            AddressKind::Fallback(s) => s.clone(),
        }
    }

    fn decode(&self, s: &str) -> Option<AddressKind> {
        if let Some(hexpart) = s.strip_prefix("p2pkh:") {
            let mut digest = [0u8; 20];
            hex::decode_to_slice(hexpart, &mut digest).ok()?;
            return Some(AddressKind::P2pkh(digest));
        }

        if let Some(hexpart) = s.strip_prefix("p2sh:") {
            let mut digest = [0u8; 20];
            hex::decode_to_slice(hexpart, &mut digest).ok()?;
            return Some(AddressKind::P2sh(digest));
        }

        Some(AddressKind::Fallback(s.to_string()))
    }
}

/// Set of encoded address strings a client has registered interest in,
/// mirroring `client.addrRequests` in spec.md §3.
pub type AddressSet = HashSet<String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_p2pkh() {
        let decoder = TestAddressDecoder;
        let script = {
            let mut v = vec![0x00];
            v.extend_from_slice(&[7u8; 20]);
            v
        };
        let addrs = decoder.extract_addresses(&script);
        assert_eq!(addrs.len(), 1);
        let encoded = decoder.encode(&addrs[0]);
        assert_eq!(decoder.decode(&encoded), Some(addrs[0].clone()));
    }
}
