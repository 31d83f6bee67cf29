#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod types;
pub mod warehouse;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, ModscanError, StorageError, WarehouseError};

// 설정
pub use config::ModscanConfig;

// 도메인 타입
pub use types::{ModuleVersion, ScanMode};

// 웨어하우스
pub use warehouse::{
    PartitionQuery, Row, SchemaRegistry, TableSchema, Warehouse, upload_many,
};

// 오브젝트 스토어
pub use storage::{FsObjectStore, ObjectStore};
