//! 共享库
//!
//! 包含规则引擎服务共用的配置、数据库连接、可观测性等基础设施代码。

pub mod config;
pub mod database;
pub mod observability;
