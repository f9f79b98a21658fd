pub mod bitmap_sql;
pub mod file_sled;
pub mod in_memory;
pub mod redis_bit;
pub mod redis_set;
pub mod sql_table;

pub use bitmap_sql::BitmapSqlTableBackend;
pub use file_sled::FileBackend;
pub use in_memory::InMemorySetBackend;
pub use redis_bit::RedisBitBackend;
pub use redis_set::RedisSetBackend;
pub use sql_table::SqlTableBackend;
