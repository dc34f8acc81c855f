//! SoilWatch kernel : ingestion de télémétrie capteurs + dashboard carte.
//!
//! Deux acteurs partagent uniquement la [`table::DeviceTable`] :
//! l'ingestor (tâche de fond, écriture) et les handlers HTTP (snapshots, lecture).

pub mod config;
pub mod health;
pub mod http;
pub mod ingest;
pub mod models;
pub mod page;
pub mod seed;
pub mod source;
pub mod state;
pub mod table;
pub mod view;
