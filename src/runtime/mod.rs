//! Исполнительные среды (бэкенды) для ASG.
//!
//! `backend` задаёт общий трейт, `cpu_backend` реализует его поверх
//! `ndarray`, а `session` связывает граф с данными по именам входов.

pub mod backend;
pub mod cpu_backend;
pub mod session;
