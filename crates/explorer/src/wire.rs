//! Response shapes of the explorer's address endpoints.
//!
//! Only the fields the watcher reads are modeled; everything else in the
//! explorer payload is ignored.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsPage {
    #[serde(default)]
    pub items: Vec<ExplorerTransaction>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerTransaction {
    pub id: String,
    /// Block timestamp in milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub inclusion_height: Option<u64>,
    #[serde(default)]
    pub inputs: Vec<ExplorerBox>,
    #[serde(default)]
    pub outputs: Vec<ExplorerBox>,
}

/// An input or output box.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerBox {
    #[serde(default)]
    pub address: Option<String>,
    /// nanoERG
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub assets: Vec<ExplorerAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerAsset {
    pub token_id: String,
    pub amount: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub decimals: Option<u32>,
}

/// `GET /addresses/{address}/balance/confirmed`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    #[serde(default)]
    pub nano_ergs: u64,
    #[serde(default)]
    pub tokens: Vec<BalanceToken>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceToken {
    pub token_id: String,
    pub amount: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub decimals: Option<u32>,
}
