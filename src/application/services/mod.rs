pub mod repo_metadata;
