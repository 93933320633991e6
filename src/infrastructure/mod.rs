//! 基础设施层：数据库、日志、事件总线

pub mod db;
pub mod event_bus;
pub mod logging;
