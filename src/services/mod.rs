pub mod callbacks;
pub mod crypto;
pub mod legacy;
pub mod logger;
pub mod merchant;
pub mod simplepay_service;
pub mod transport;
pub mod views;
