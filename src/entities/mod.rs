pub mod order;
pub mod order_detail;
pub mod product_variant;
pub mod promotion;
pub mod promotion_product;
pub mod stock_history;
pub mod voucher;
pub mod voucher_usage;
