// TRON addresses: 0x41-prefixed 21-byte payload, rendered as base58check (34 chars, leading `T`).

use ethers::signers::{LocalWallet, Signer};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Version byte carried by every mainnet address.
pub const ADDRESS_PREFIX: u8 = 0x41;
/// Raw payload length (prefix + 20-byte account id).
pub const ADDRESS_LEN: usize = 21;
const CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid base58 address: {0}")]
    InvalidBase58(String),
    #[error("Invalid hex address: {0}")]
    InvalidHex(String),
    #[error("Invalid address length: {0} bytes")]
    InvalidLength(usize),
    #[error("Invalid address prefix: 0x{0:02x}")]
    InvalidPrefix(u8),
    #[error("Checksum mismatch for address {0}")]
    ChecksumMismatch(String),
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// A validated TRON account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TronAddress([u8; ADDRESS_LEN]);

impl TronAddress {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != ADDRESS_LEN {
            return Err(AddressError::InvalidLength(bytes.len()));
        }
        if bytes[0] != ADDRESS_PREFIX {
            return Err(AddressError::InvalidPrefix(bytes[0]));
        }
        let mut raw = [0u8; ADDRESS_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Wraps a 20-byte EVM-style account id with the TRON version byte.
    pub fn from_evm(address: ethers::types::Address) -> Self {
        let mut raw = [0u8; ADDRESS_LEN];
        raw[0] = ADDRESS_PREFIX;
        raw[1..].copy_from_slice(address.as_bytes());
        Self(raw)
    }

    /// Parses the `41…` hex form (an optional `0x` is tolerated).
    pub fn from_hex(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Parses the base58check form, rejecting any checksum mismatch.
    pub fn from_base58(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        let decoded = bs58::decode(trimmed)
            .into_vec()
            .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;
        if decoded.len() != ADDRESS_LEN + CHECKSUM_LEN {
            return Err(AddressError::InvalidLength(decoded.len()));
        }
        let (payload, checksum) = decoded.split_at(ADDRESS_LEN);
        if checksum != double_sha256_checksum(payload) {
            return Err(AddressError::ChecksumMismatch(trimmed.to_string()));
        }
        Self::from_bytes(payload)
    }

    /// Accepts either representation; the API returns both depending on endpoint.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.starts_with('T') {
            Self::from_base58(trimmed)
        } else {
            Self::from_hex(trimmed)
        }
    }

    /// Derives the address controlled by a secp256k1 private key (hex).
    ///
    /// Same derivation as Ethereum: keccak256 over the uncompressed public key
    /// without its `0x04` tag, last 20 bytes, then the TRON version byte.
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, AddressError> {
        let trimmed = private_key_hex.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let wallet = LocalWallet::from_str(digits)
            .map_err(|e| AddressError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self::from_evm(wallet.address()))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Lowercase `41…` hex, the form the wallet endpoints expect.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// 20-byte account id without the version byte, for ABI encoding.
    pub fn account_id_hex(&self) -> String {
        hex::encode(&self.0[1..])
    }

    pub fn to_base58(&self) -> String {
        let mut buf = Vec::with_capacity(ADDRESS_LEN + CHECKSUM_LEN);
        buf.extend_from_slice(&self.0);
        buf.extend_from_slice(&double_sha256_checksum(&self.0));
        bs58::encode(buf).into_string()
    }
}

fn double_sha256_checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&second[..CHECKSUM_LEN]);
    out
}

impl fmt::Display for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TronAddress({})", self.to_base58())
    }
}

impl FromStr for TronAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TronAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for TronAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Normalises an address string as returned by the API into base58.
///
/// Hex (`41…`) inputs are converted; base58 inputs are validated.
pub fn normalize_address(input: &str) -> Result<String, AddressError> {
    TronAddress::parse(input).map(|a| a.to_base58())
}

/// `first prefix_len chars` + `*` + `last suffix_len chars`.
///
/// Addresses too short to mask are returned unchanged.
pub fn mask_address(address: &str, prefix_len: usize, suffix_len: usize) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= prefix_len + suffix_len {
        return address.to_string();
    }
    let prefix: String = chars[..prefix_len].iter().collect();
    let suffix: String = chars[chars.len() - suffix_len..].iter().collect();
    format!("{}*{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "412a68baf67f1c497d9a4a609276a90dcd6ea77444";
    const BASE58: &str = "TDqSquXBgUCLYvYC4XZgrprLK589dkhSCf";

    #[test]
    fn hex_to_base58_and_back() {
        let addr = TronAddress::from_hex(HEX).unwrap();
        assert_eq!(addr.to_base58(), BASE58);

        let back = TronAddress::from_base58(&addr.to_base58()).unwrap();
        assert_eq!(back.to_hex(), HEX);
        assert_eq!(back.as_bytes(), addr.as_bytes());
    }

    #[test]
    fn usdt_contract_address_converts() {
        let addr = TronAddress::from_hex("41a614f803b6fd780986a42c78ec9c7f77e6ded13c").unwrap();
        assert_eq!(addr.to_string(), "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t");
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let addr = TronAddress::from_hex(HEX).unwrap();
        let mut raw = bs58::decode(addr.to_base58()).into_vec().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let corrupted = bs58::encode(raw).into_string();

        let err = TronAddress::from_base58(&corrupted).unwrap_err();
        assert!(matches!(err, AddressError::ChecksumMismatch(_)));
    }

    #[test]
    fn wrong_prefix_and_length_are_rejected() {
        assert_eq!(
            TronAddress::from_hex("422a68baf67f1c497d9a4a609276a90dcd6ea77444"),
            Err(AddressError::InvalidPrefix(0x42))
        );
        assert_eq!(
            TronAddress::from_hex("412a68ba"),
            Err(AddressError::InvalidLength(4))
        );
        assert!(TronAddress::from_hex("zz").is_err());
        assert!(TronAddress::from_base58("T0OIl").is_err());
    }

    #[test]
    fn private_key_derivation() {
        let addr = TronAddress::from_private_key(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(addr.to_base58(), "TMVQGm1qAQYVdetCeGRRkTWYYrLXuHK2HC");
        assert!(TronAddress::from_private_key("not-a-key").is_err());
    }

    #[test]
    fn parse_accepts_both_forms() {
        assert_eq!(normalize_address(HEX).unwrap(), BASE58);
        assert_eq!(normalize_address(BASE58).unwrap(), BASE58);
        let parsed: TronAddress = BASE58.parse().unwrap();
        assert_eq!(parsed.account_id_hex(), &HEX[2..]);
    }

    #[test]
    fn masking() {
        assert_eq!(mask_address(BASE58, 3, 4), "TDq*hSCf");
        assert_eq!(mask_address("TABCDEF", 3, 4), "TABCDEF");
    }
}
