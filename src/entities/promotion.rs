use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A time-bounded percentage discount applied to a set of products.
///
/// The date window is inclusive on both ends; `end_date` covers the whole day.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promotions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub discount_percent: i32,
    pub start_date: Date,
    pub end_date: Date,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::promotion_product::Entity")]
    PromotionProducts,
}

impl Related<super::promotion_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PromotionProducts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
