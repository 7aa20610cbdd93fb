//! Building blocks for [`clap`]-driven configuration of the ingestion service.

pub mod ingest;
