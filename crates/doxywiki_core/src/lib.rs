pub mod config;
pub mod convert;
pub mod extract;
pub mod html;
pub mod mediawiki;
pub mod page;
pub mod runtime;
pub mod site;
pub mod store;
pub mod strategy;
pub mod title;
