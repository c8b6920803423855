pub mod browser;
pub mod config;
pub mod db;
pub mod extract;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod output;
pub mod paginate;
pub mod score;
