//! Claim entity for tracking faucet payouts per wallet and requester IP.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "claims")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Recipient wallet address, normalized to lowercase 0x-prefixed hex
    #[sea_orm(column_type = "String(StringLen::N(42))")]
    pub wallet_address: String,
    /// IP address of the requester (forwarding header or socket peer)
    #[sea_orm(column_type = "String(StringLen::N(45))")]
    pub ip_address: String,
    /// Transaction hash of the most recent drip to this pair
    #[sea_orm(column_type = "String(StringLen::N(66))")]
    pub tx_hash: String,
    /// Timestamp of the most recent claim
    pub last_visit: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
