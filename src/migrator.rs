use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_product_variants_table::Migration),
            Box::new(m20240101_000002_create_stock_history_table::Migration),
            Box::new(m20240101_000003_create_vouchers_table::Migration),
            Box::new(m20240101_000004_create_orders_table::Migration),
            Box::new(m20240101_000005_create_orderdetails_table::Migration),
            Box::new(m20240101_000006_create_voucher_usages_table::Migration),
            Box::new(m20240101_000007_create_promotions_table::Migration),
            Box::new(m20240101_000008_create_promotion_products_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_product_variants_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_product_variants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create product_variants table aligned with entities::product_variant Model
            manager
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::ProductId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::SizeId).integer().not_null())
                        .col(
                            ColumnDef::new(ProductVariants::ColorId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::Price).decimal().not_null())
                        .col(
                            ColumnDef::new(ProductVariants::StockQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_variants_product_id")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ProductVariants {
        Table,
        Id,
        ProductId,
        SizeId,
        ColorId,
        Price,
        StockQuantity,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_stock_history_table {

    use super::m20240101_000001_create_product_variants_table::ProductVariants;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_stock_history_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Append-only ledger of stock movements, one row per change
            manager
                .create_table(
                    Table::create()
                        .table(StockHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockHistory::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(StockHistory::ProductVariantId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockHistory::ActionType).string().not_null())
                        .col(
                            ColumnDef::new(StockHistory::QuantityBefore)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockHistory::QuantityChange)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockHistory::QuantityAfter)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockHistory::Reason).string().not_null())
                        .col(ColumnDef::new(StockHistory::Notes).string().null())
                        .col(
                            ColumnDef::new(StockHistory::ReferenceId)
                                .big_integer()
                                .null(),
                        )
                        .col(ColumnDef::new(StockHistory::ReferenceType).string().null())
                        .col(ColumnDef::new(StockHistory::PerformedBy).integer().null())
                        .col(
                            ColumnDef::new(StockHistory::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_history_product_variant_id")
                                .from(StockHistory::Table, StockHistory::ProductVariantId)
                                .to(ProductVariants::Table, ProductVariants::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Useful indexes
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_history_variant_created")
                        .table(StockHistory::Table)
                        .col(StockHistory::ProductVariantId)
                        .col(StockHistory::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_history_action_type")
                        .table(StockHistory::Table)
                        .col(StockHistory::ActionType)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_history_created_at")
                        .table(StockHistory::Table)
                        .col(StockHistory::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockHistory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockHistory {
        Table,
        Id,
        ProductVariantId,
        ActionType,
        QuantityBefore,
        QuantityChange,
        QuantityAfter,
        Reason,
        Notes,
        ReferenceId,
        ReferenceType,
        PerformedBy,
        CreatedAt,
    }
}

mod m20240101_000003_create_vouchers_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_vouchers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Vouchers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Vouchers::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Vouchers::Code).string().not_null())
                        .col(ColumnDef::new(Vouchers::DiscountType).string().not_null())
                        .col(ColumnDef::new(Vouchers::DiscountValue).decimal().not_null())
                        .col(
                            ColumnDef::new(Vouchers::MinOrderAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Vouchers::MaxDiscountAmount)
                                .decimal()
                                .null(),
                        )
                        .col(ColumnDef::new(Vouchers::UsageLimit).integer().null())
                        .col(
                            ColumnDef::new(Vouchers::UsedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Vouchers::UserLimit)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(ColumnDef::new(Vouchers::StartDate).date().not_null())
                        .col(ColumnDef::new(Vouchers::EndDate).date().not_null())
                        .col(
                            ColumnDef::new(Vouchers::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Vouchers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Vouchers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Codes are looked up on every checkout; uniqueness is enforced here
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_vouchers_code")
                        .table(Vouchers::Table)
                        .col(Vouchers::Code)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Vouchers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Vouchers {
        Table,
        Id,
        Code,
        DiscountType,
        DiscountValue,
        MinOrderAmount,
        MaxDiscountAmount,
        UsageLimit,
        UsedCount,
        UserLimit,
        StartDate,
        EndDate,
        Active,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_orders_table {

    use super::m20240101_000003_create_vouchers_table::Vouchers;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create orders table aligned with entities::order Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Orders::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Orders::UserId).integer().not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string().not_null())
                        .col(
                            ColumnDef::new(Orders::PaymentTransactionId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::SubTotal).decimal().not_null())
                        .col(
                            ColumnDef::new(Orders::ShippingFee)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::DiscountAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::TotalAmount).decimal().not_null())
                        .col(ColumnDef::new(Orders::VoucherId).big_integer().null())
                        .col(ColumnDef::new(Orders::ShippingAddress).string().not_null())
                        .col(ColumnDef::new(Orders::ShippingProvince).string().null())
                        .col(ColumnDef::new(Orders::ShippingWard).string().null())
                        .col(ColumnDef::new(Orders::Notes).string().null())
                        .col(ColumnDef::new(Orders::CancelReason).string().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_voucher_id")
                                .from(Orders::Table, Orders::VoucherId)
                                .to(Vouchers::Table, Vouchers::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Useful indexes
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        UserId,
        Status,
        PaymentMethod,
        PaymentStatus,
        PaymentTransactionId,
        SubTotal,
        ShippingFee,
        DiscountAmount,
        TotalAmount,
        VoucherId,
        ShippingAddress,
        ShippingProvince,
        ShippingWard,
        Notes,
        CancelReason,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000005_create_orderdetails_table {

    use super::m20240101_000001_create_product_variants_table::ProductVariants;
    use super::m20240101_000004_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_orderdetails_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderDetails::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderDetails::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(OrderDetails::OrderId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderDetails::ProductVariantId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderDetails::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderDetails::UnitPrice).decimal().not_null())
                        .col(
                            ColumnDef::new(OrderDetails::DiscountAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(OrderDetails::Subtotal).decimal().not_null())
                        .col(
                            ColumnDef::new(OrderDetails::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orderdetails_order_id")
                                .from(OrderDetails::Table, OrderDetails::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orderdetails_product_variant_id")
                                .from(OrderDetails::Table, OrderDetails::ProductVariantId)
                                .to(ProductVariants::Table, ProductVariants::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orderdetails_order_id")
                        .table(OrderDetails::Table)
                        .col(OrderDetails::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orderdetails_product_variant_id")
                        .table(OrderDetails::Table)
                        .col(OrderDetails::ProductVariantId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderDetails::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderDetails {
        #[sea_orm(iden = "orderdetails")]
        Table,
        Id,
        OrderId,
        ProductVariantId,
        Quantity,
        UnitPrice,
        DiscountAmount,
        Subtotal,
        CreatedAt,
    }
}

mod m20240101_000006_create_voucher_usages_table {

    use super::m20240101_000003_create_vouchers_table::Vouchers;
    use super::m20240101_000004_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_voucher_usages_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // One row per redemption, scoped to voucher, user and order
            manager
                .create_table(
                    Table::create()
                        .table(VoucherUsages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(VoucherUsages::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(VoucherUsages::VoucherId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(VoucherUsages::UserId).integer().not_null())
                        .col(
                            ColumnDef::new(VoucherUsages::OrderId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(VoucherUsages::UsedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_voucher_usages_voucher_id")
                                .from(VoucherUsages::Table, VoucherUsages::VoucherId)
                                .to(Vouchers::Table, Vouchers::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_voucher_usages_order_id")
                                .from(VoucherUsages::Table, VoucherUsages::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_voucher_usages_voucher_user")
                        .table(VoucherUsages::Table)
                        .col(VoucherUsages::VoucherId)
                        .col(VoucherUsages::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_voucher_usages_order_id")
                        .table(VoucherUsages::Table)
                        .col(VoucherUsages::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(VoucherUsages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum VoucherUsages {
        Table,
        Id,
        VoucherId,
        UserId,
        OrderId,
        UsedAt,
    }
}

mod m20240101_000007_create_promotions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000007_create_promotions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Promotions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Promotions::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Promotions::Name).string().not_null())
                        .col(
                            ColumnDef::new(Promotions::DiscountPercent)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Promotions::StartDate).date().not_null())
                        .col(ColumnDef::new(Promotions::EndDate).date().not_null())
                        .col(
                            ColumnDef::new(Promotions::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Promotions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_promotions_active")
                        .table(Promotions::Table)
                        .col(Promotions::Active)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Promotions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Promotions {
        Table,
        Id,
        Name,
        DiscountPercent,
        StartDate,
        EndDate,
        Active,
        CreatedAt,
    }
}

mod m20240101_000008_create_promotion_products_table {

    use super::m20240101_000007_create_promotions_table::Promotions;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000008_create_promotion_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Join table, composite primary key
            manager
                .create_table(
                    Table::create()
                        .table(PromotionProducts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PromotionProducts::PromotionId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PromotionProducts::ProductId)
                                .integer()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .name("pk_promotion_products")
                                .col(PromotionProducts::PromotionId)
                                .col(PromotionProducts::ProductId),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_promotion_products_promotion_id")
                                .from(PromotionProducts::Table, PromotionProducts::PromotionId)
                                .to(Promotions::Table, Promotions::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_promotion_products_product_id")
                        .table(PromotionProducts::Table)
                        .col(PromotionProducts::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PromotionProducts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PromotionProducts {
        Table,
        PromotionId,
        ProductId,
    }
}
