//! The genesis JSON format accepted at node initialization.

use rbtp_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The genesis block definition: chain parameters plus the initial
/// allocation.
///
/// The keccak256 of the block-0 header built from this definition is the
/// `genesis` hash exchanged in handshakes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Genesis {
    /// Fork schedule and chain id.
    pub config: ChainConfig,
    /// Seal nonce of the genesis header.
    #[serde(with = "quantity")]
    pub nonce: u64,
    /// Timestamp of the genesis header.
    #[serde(with = "quantity")]
    pub timestamp: u64,
    /// Extra data of the genesis header.
    pub extra_data: Bytes,
    /// Gas limit of the genesis header.
    #[serde(with = "quantity")]
    pub gas_limit: u64,
    /// Difficulty of the genesis header.
    #[serde(with = "big_quantity")]
    pub difficulty: U256,
    /// Seal mix digest of the genesis header.
    #[serde(alias = "mixhash")]
    pub mix_hash: B256,
    /// Beneficiary of the genesis header.
    pub coinbase: Address,
    /// Initial account allocation.
    pub alloc: BTreeMap<Address, GenesisAccount>,
    /// Parent hash of the genesis header, normally zero.
    pub parent_hash: B256,
}

/// Fork activation heights, mirroring the recognized genesis JSON `config`
/// section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainConfig {
    /// The chain id used for replay protection.
    #[serde(with = "quantity")]
    pub chain_id: u64,
    /// Homestead switch block.
    #[serde(with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub homestead_block: Option<u64>,
    /// Tangerine Whistle (EIP-150) switch block.
    #[serde(rename = "eip150Block", with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub eip150_block: Option<u64>,
    /// EIP-155 replay protection switch block.
    #[serde(rename = "eip155Block", with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub eip155_block: Option<u64>,
    /// Spurious Dragon (EIP-158 empty account pruning) switch block.
    #[serde(rename = "eip158Block", with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub eip158_block: Option<u64>,
    /// Byzantium switch block.
    #[serde(with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub byzantium_block: Option<u64>,
    /// Constantinople switch block.
    #[serde(with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub constantinople_block: Option<u64>,
    /// Petersburg switch block.
    #[serde(with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub petersburg_block: Option<u64>,
}

/// One account of the genesis allocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenesisAccount {
    /// Initial balance in wei.
    #[serde(with = "big_quantity")]
    pub balance: U256,
    /// Initial nonce.
    #[serde(with = "opt_quantity", skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    /// Predeployed bytecode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Bytes>,
    /// Prefilled storage slots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<BTreeMap<B256, B256>>,
}

/// Accepts `u64` quantities as JSON numbers, decimal strings or 0x-prefixed
/// hex strings; emits hex strings.
mod quantity {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    pub(crate) fn parse(text: &str) -> Result<u64, String> {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex quantity: {e}"))
        } else {
            text.parse().map_err(|e| format!("invalid quantity: {e}"))
        }
    }
}

mod opt_quantity {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(
        value: &Option<u64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => super::quantity::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        #[derive(Deserialize)]
        struct Wrap(#[serde(with = "super::quantity")] u64);
        Ok(Option::<Wrap>::deserialize(deserializer)?.map(|w| w.0))
    }
}

/// Accepts `U256` quantities as JSON numbers, decimal strings or 0x-prefixed
/// hex strings; emits hex strings.
mod big_quantity {
    use rbtp_primitives::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<U256, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(U256::from(value)),
            Raw::Text(text) => {
                let text = text.trim();
                if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    U256::from_str_radix(hex, 16).map_err(de::Error::custom)
                } else {
                    U256::from_str_radix(text, 10).map_err(de::Error::custom)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_quantity_styles() {
        let raw = r#"{
            "config": {
                "chainId": 777,
                "homesteadBlock": 0,
                "eip150Block": "0x0",
                "eip155Block": "3",
                "eip158Block": 3,
                "byzantiumBlock": "0x10",
                "constantinopleBlock": 20,
                "petersburgBlock": 20
            },
            "nonce": "0x0000000000000042",
            "timestamp": "0x0",
            "extraData": "0x11bbe8db4e347b4e8c937c1c8370e4b5ed33adb3db69cbdb7a38e1e50b1b82fa",
            "gasLimit": "0x1388",
            "difficulty": "0x400000000",
            "mixhash": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "coinbase": "0x0000000000000000000000000000000000000000",
            "alloc": {
                "0x0000000000000000000000000000000000000001": { "balance": "111111111" },
                "0x0000000000000000000000000000000000000002": { "balance": "0xde0b6b3a7640000", "nonce": 4 }
            },
            "parentHash": "0x0000000000000000000000000000000000000000000000000000000000000000"
        }"#;

        let genesis: Genesis = serde_json::from_str(raw).unwrap();
        assert_eq!(genesis.config.chain_id, 777);
        assert_eq!(genesis.config.eip155_block, Some(3));
        assert_eq!(genesis.config.byzantium_block, Some(16));
        assert_eq!(genesis.nonce, 0x42);
        assert_eq!(genesis.gas_limit, 0x1388);
        assert_eq!(genesis.difficulty, U256::from(0x400000000u64));

        let one = Address::with_last_byte(1);
        assert_eq!(genesis.alloc[&one].balance, U256::from(111_111_111u64));
        let two = Address::with_last_byte(2);
        assert_eq!(genesis.alloc[&two].nonce, Some(4));
    }

    #[test]
    fn json_roundtrip() {
        let raw = r#"{
            "config": { "chainId": 1, "homesteadBlock": 0 },
            "nonce": "0x1",
            "gasLimit": "0x5208",
            "difficulty": "0x20000",
            "alloc": {}
        }"#;
        let genesis: Genesis = serde_json::from_str(raw).unwrap();
        let reencoded = serde_json::to_string(&genesis).unwrap();
        let reparsed: Genesis = serde_json::from_str(&reencoded).unwrap();
        assert_eq!(genesis, reparsed);
    }
}
