use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// What kind of stock movement a ledger entry records.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum StockActionType {
    #[sea_orm(string_value = "sale")]
    Sale,
    #[sea_orm(string_value = "return")]
    Return,
    #[sea_orm(string_value = "damaged")]
    Damaged,
    #[sea_orm(string_value = "restock")]
    Restock,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    #[sea_orm(string_value = "order_cancelled")]
    OrderCancelled,
}

impl StockActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockActionType::Sale => "sale",
            StockActionType::Return => "return",
            StockActionType::Damaged => "damaged",
            StockActionType::Restock => "restock",
            StockActionType::Adjustment => "adjustment",
            StockActionType::OrderCancelled => "order_cancelled",
        }
    }

    /// Action types reserved for the order flow; manual adjustments may not use them.
    pub fn is_order_owned(&self) -> bool {
        matches!(self, StockActionType::Sale | StockActionType::OrderCancelled)
    }
}

/// What a ledger entry's `reference_id` points at.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum StockReferenceType {
    #[sea_orm(string_value = "order")]
    Order,
    #[sea_orm(string_value = "purchase_order")]
    PurchaseOrder,
}

/// Append-only ledger of stock changes.
///
/// Rows are never updated or deleted; a correction is a new entry. For every
/// row `quantity_after = quantity_before + quantity_change`, and the latest
/// row's `quantity_after` matches the variant's live `stock_quantity`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub product_variant_id: i32,
    pub action_type: StockActionType,
    pub quantity_before: i32,
    pub quantity_change: i32,
    pub quantity_after: i32,
    pub reason: String,
    pub notes: Option<String>,
    pub reference_id: Option<i64>,
    pub reference_type: Option<StockReferenceType>,
    pub performed_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product_variant::Entity",
        from = "Column::ProductVariantId",
        to = "super::product_variant::Column::Id"
    )]
    ProductVariant,
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductVariant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
