// Block Parser - extracts token transfers from a full block without per-tx lookups

use crate::address::{AddressError, TronAddress};
use crate::settings::Token;
use crate::types::chain::{BlockResponse, BlockTransaction};
use crate::types::conversions::{effective_decimals, hex_to_decimal, sun_to_trx};
use crate::types::Transfer;
use log::debug;

pub const TRIGGER_SMART_CONTRACT: &str = "TriggerSmartContract";
/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: &str = "a9059cbb";

// selector (8) + two 32-byte words (64 hex each)
const TRANSFER_CALL_LEN: usize = 8 + 64 + 64;

/// Decodes TRC20 `transfer` calls to one token contract out of raw blocks.
///
/// Only the first contract of each transaction is inspected; TRON transactions
/// carry exactly one in practice.
#[derive(Debug, Clone)]
pub struct BlockParser {
    token_contract: TronAddress,
    decimals: u32,
}

impl BlockParser {
    pub fn new(token: &Token) -> Result<Self, AddressError> {
        Ok(Self {
            token_contract: TronAddress::parse(&token.contract)?,
            decimals: effective_decimals(token.decimals),
        })
    }

    pub fn extract_transfers(&self, block: &BlockResponse) -> Vec<Transfer> {
        let header = &block.block_header.raw_data;
        block
            .transactions
            .iter()
            .filter_map(|tx| self.decode_transfer(tx, header.number, header.timestamp))
            .collect()
    }

    fn decode_transfer(
        &self,
        tx: &BlockTransaction,
        block_number: i64,
        block_timestamp: i64,
    ) -> Option<Transfer> {
        let contract = tx.raw_data.contract.first()?;
        if contract.contract_type != TRIGGER_SMART_CONTRACT {
            return None;
        }
        let value = &contract.parameter.value;
        match TronAddress::parse(&value.contract_address) {
            Ok(addr) if addr == self.token_contract => {}
            _ => return None,
        }

        let data = value.data.to_ascii_lowercase();
        if !data.starts_with(TRANSFER_SELECTOR) || data.len() < TRANSFER_CALL_LEN {
            return None;
        }
        // argument words are sliced by byte offset
        if !data.is_ascii() {
            debug!("skip tx {}: non-hex call data", tx.tx_id);
            return None;
        }

        let from = match TronAddress::parse(&value.owner_address) {
            Ok(addr) => addr.to_base58(),
            Err(e) => {
                debug!("skip tx {}: bad owner address: {}", tx.tx_id, e);
                return None;
            }
        };
        // recipient is the low 20 bytes of the first argument word
        let to = match TronAddress::from_hex(&format!("41{}", &data[32..72])) {
            Ok(addr) => addr.to_base58(),
            Err(e) => {
                debug!("skip tx {}: bad recipient: {}", tx.tx_id, e);
                return None;
            }
        };
        let amount = match hex_to_decimal(&data[72..136], self.decimals) {
            Ok(amount) => amount,
            Err(e) => {
                debug!("skip tx {}: bad amount: {}", tx.tx_id, e);
                return None;
            }
        };

        let ret = tx.ret.first();
        Some(Transfer {
            tx_id: tx.tx_id.clone(),
            block_number,
            block_timestamp,
            from,
            to,
            amount,
            contract_address: self.token_contract.to_base58(),
            confirmed: ret.map(|r| r.contract_ret == "SUCCESS").unwrap_or(false),
            fee: sun_to_trx(ret.map(|r| r.fee).unwrap_or(0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const OWNER_HEX: &str = "412a68baf67f1c497d9a4a609276a90dcd6ea77444";
    const USDT_HEX: &str = "41a614f803b6fd780986a42c78ec9c7f77e6ded13c";

    fn transfer_data(to_hex: &str, raw_amount: u64) -> String {
        format!(
            "{}{:0>64}{:064x}",
            TRANSFER_SELECTOR,
            &to_hex[2..],
            raw_amount
        )
    }

    fn block(transactions: serde_json::Value) -> BlockResponse {
        serde_json::from_value(serde_json::json!({
            "blockID": "000000000001",
            "block_header": { "raw_data": { "number": 1234, "timestamp": 1_700_000_000_000i64 } },
            "transactions": transactions
        }))
        .unwrap()
    }

    fn trigger(contract: &str, data: &str, ret: &str) -> serde_json::Value {
        serde_json::json!({
            "txID": "tx",
            "ret": [{ "contractRet": ret }],
            "raw_data": { "contract": [{
                "type": TRIGGER_SMART_CONTRACT,
                "parameter": { "value": {
                    "owner_address": OWNER_HEX,
                    "contract_address": contract,
                    "data": data
                }}
            }]}
        })
    }

    #[test]
    fn decodes_usdt_transfer() {
        let parser = BlockParser::new(&Token::default()).unwrap();
        let data = transfer_data(USDT_HEX, 2_500_000_000);
        let transfers = parser.extract_transfers(&block(serde_json::json!([
            trigger(USDT_HEX, &data, "SUCCESS")
        ])));

        assert_eq!(transfers.len(), 1);
        let t = &transfers[0];
        assert_eq!(t.from, "TDqSquXBgUCLYvYC4XZgrprLK589dkhSCf");
        assert_eq!(t.to, "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t");
        assert_eq!(t.amount, Decimal::from_str("2500").unwrap());
        assert_eq!(t.block_number, 1234);
        assert!(t.confirmed);
    }

    #[test]
    fn ignores_other_contracts_methods_and_short_data() {
        let parser = BlockParser::new(&Token::default()).unwrap();
        let data = transfer_data(USDT_HEX, 1);
        let approve = data.replacen(TRANSFER_SELECTOR, "095ea7b3", 1);
        let transfers = parser.extract_transfers(&block(serde_json::json!([
            trigger(OWNER_HEX, &data, "SUCCESS"),
            trigger(USDT_HEX, &approve, "SUCCESS"),
            trigger(USDT_HEX, &data[..100], "SUCCESS"),
            { "txID": "plain", "raw_data": { "contract": [{ "type": "TransferContract" }] } }
        ])));
        assert!(transfers.is_empty());
    }

    #[test]
    fn non_ascii_call_data_is_skipped() {
        let parser = BlockParser::new(&Token::default()).unwrap();
        let garbled = format!("{}{}é{}", TRANSFER_SELECTOR, "0".repeat(23), "0".repeat(120));
        let valid = transfer_data(USDT_HEX, 3_000_000);
        let transfers = parser.extract_transfers(&block(serde_json::json!([
            trigger(USDT_HEX, &garbled, "SUCCESS"),
            trigger(USDT_HEX, &valid, "SUCCESS")
        ])));
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount, Decimal::from_str("3").unwrap());
    }

    #[test]
    fn reverted_transfer_is_unconfirmed() {
        let parser = BlockParser::new(&Token::default()).unwrap();
        let data = transfer_data(USDT_HEX, 1_000_000);
        let transfers = parser.extract_transfers(&block(serde_json::json!([
            trigger(USDT_HEX, &data, "REVERT")
        ])));
        assert_eq!(transfers.len(), 1);
        assert!(!transfers[0].confirmed);
    }
}
