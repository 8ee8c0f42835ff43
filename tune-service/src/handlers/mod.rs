pub mod health;
pub mod orders;
pub mod precheck;
pub mod promo;
pub mod webhook;
