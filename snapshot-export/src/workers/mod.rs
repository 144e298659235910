pub mod pool;
pub mod table_export;
