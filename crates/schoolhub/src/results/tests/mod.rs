mod common;
mod ingestion;
