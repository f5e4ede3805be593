pub mod cache;
pub mod gateway;
pub mod kv;
pub mod odoo;
