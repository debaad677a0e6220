pub mod order_lines;
pub mod order_status;
pub mod orders;
pub mod reservations;
pub mod vouchers;
