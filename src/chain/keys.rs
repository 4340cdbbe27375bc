//! secp256k1 key handling and address encodings for both networks.

use k256::ecdsa::{SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use super::ChainError;

/// Version byte of Tron mainnet addresses.
pub const TRON_ADDRESS_PREFIX: u8 = 0x41;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn generate_signing_key() -> SigningKey {
    SigningKey::random(&mut rand::thread_rng())
}

pub fn signing_key_from_hex(private_key: &str) -> Result<SigningKey, ChainError> {
    let trimmed = private_key.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = Zeroizing::new(
        hex::decode(hex_part).map_err(|e| ChainError::InvalidKey(e.to_string()))?,
    );
    if bytes.len() != 32 {
        return Err(ChainError::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    SigningKey::from_slice(&bytes).map_err(|e| ChainError::InvalidKey(e.to_string()))
}

pub fn private_key_hex(key: &SigningKey) -> Zeroizing<String> {
    Zeroizing::new(hex::encode(key.to_bytes()))
}

/// Last 20 bytes of keccak256 over the uncompressed public key (without the 0x04 tag).
pub fn evm_address_bytes(key: &VerifyingKey) -> [u8; 20] {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// EIP-55 mixed-case checksum encoding.
pub fn to_checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Accepts `0x` + 40 hex characters. All-lowercase and all-uppercase forms carry no checksum;
/// mixed case must match the EIP-55 encoding exactly.
pub fn parse_evm_address(address: &str) -> Option<[u8; 20]> {
    let hex_part = address.strip_prefix("0x")?;
    if hex_part.len() != 40 {
        return None;
    }
    let bytes = hex::decode(hex_part).ok()?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);

    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && to_checksum_address(&out) != address {
        return None;
    }
    Some(out)
}

pub fn tron_address_bytes(key: &VerifyingKey) -> [u8; 21] {
    let mut out = [0u8; 21];
    out[0] = TRON_ADDRESS_PREFIX;
    out[1..].copy_from_slice(&evm_address_bytes(key));
    out
}

pub fn tron_base58(address: &[u8; 21]) -> String {
    bs58::encode(address).with_check().into_string()
}

/// Decodes a base58check Tron address, verifying checksum, length and version byte.
pub fn parse_tron_address(address: &str) -> Option<[u8; 21]> {
    let bytes = bs58::decode(address).with_check(None).into_vec().ok()?;
    if bytes.len() != 21 || bytes[0] != TRON_ADDRESS_PREFIX {
        return None;
    }
    let mut out = [0u8; 21];
    out.copy_from_slice(&bytes);
    Some(out)
}

/// ABI word for an address: 12 zero bytes followed by the 20 address bytes, hex encoded.
pub fn abi_address_word(address: &[u8; 20]) -> String {
    format!("{:0>64}", hex::encode(address))
}

pub fn abi_uint_word(value: u128) -> String {
    format!("{value:064x}")
}

/// Recoverable signature over a 32-byte digest: `r || s` and the recovery id (0 or 1).
pub fn sign_digest(key: &SigningKey, digest: &[u8; 32]) -> Result<([u8; 64], u8), ChainError> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(digest)
        .map_err(|e| ChainError::InvalidKey(e.to_string()))?;
    let mut rs = [0u8; 64];
    rs.copy_from_slice(&signature.to_bytes());
    Ok((rs, recovery_id.to_byte()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature};

    const KEY_ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_known_key_derives_known_evm_address() {
        let key = signing_key_from_hex(KEY_ONE).unwrap();
        let address = evm_address_bytes(key.verifying_key());
        assert_eq!(
            to_checksum_address(&address),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn test_hex_key_accepts_prefix_and_rejects_bad_length() {
        assert!(signing_key_from_hex(&format!("0x{KEY_ONE}")).is_ok());
        assert!(matches!(
            signing_key_from_hex("abcd"),
            Err(ChainError::InvalidKey(_))
        ));
        assert!(signing_key_from_hex("zz").is_err());
    }

    #[test]
    fn test_tron_address_round_trip() {
        let key = generate_signing_key();
        let raw = tron_address_bytes(key.verifying_key());
        let encoded = tron_base58(&raw);

        assert!(encoded.starts_with('T'));
        assert_eq!(encoded.len(), 34);
        assert_eq!(parse_tron_address(&encoded), Some(raw));
    }

    #[test]
    fn test_tron_address_rejects_bad_checksum_and_evm_form() {
        let key = signing_key_from_hex(KEY_ONE).unwrap();
        let mut encoded = tron_base58(&tron_address_bytes(key.verifying_key()));
        let last = encoded.pop().unwrap();
        encoded.push(if last == 'a' { 'b' } else { 'a' });

        assert!(parse_tron_address(&encoded).is_none());
        assert!(parse_tron_address("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf").is_none());
        assert!(parse_tron_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").is_some());
    }

    #[test]
    fn test_evm_address_parse() {
        assert!(parse_evm_address("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf").is_some());
        assert!(parse_evm_address("7e5f4552091a69125d5dfcb7b8c2659029395bdf").is_none());
        assert!(parse_evm_address("0x7e5f4552091a69125d5dfcb7b8c2659029395b").is_none());
        assert!(parse_evm_address("0xzz5f4552091a69125d5dfcb7b8c2659029395bdf").is_none());
    }

    #[test]
    fn test_evm_address_checksum() {
        assert!(parse_evm_address("0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174").is_some());
        assert!(parse_evm_address("0x2791BCA1F2DE4661ED88A30C99A7A9449AA84174").is_some());
        assert!(parse_evm_address("0x2791bca1f2de4661ED88A30C99A7a9449Aa84174").is_none());
        assert!(parse_evm_address("0x7E5F4552091A69125d5DfCb7b8C2659029395BdF").is_none());
    }

    #[test]
    fn test_abi_words_are_32_bytes() {
        let address = [0x11u8; 20];
        let word = abi_address_word(&address);
        assert_eq!(word.len(), 64);
        assert!(word.starts_with("000000000000000000000000"));
        assert_eq!(abi_uint_word(1_000_000), format!("{:0>64}", "f4240"));
    }

    #[test]
    fn test_signature_recovers_signer() {
        let key = generate_signing_key();
        let digest = keccak256(b"escrow");
        let (rs, recid) = sign_digest(&key, &digest).unwrap();

        let signature = Signature::from_slice(&rs).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(
            &digest,
            &signature,
            RecoveryId::from_byte(recid).unwrap(),
        )
        .unwrap();
        assert_eq!(&recovered, key.verifying_key());
    }
}
