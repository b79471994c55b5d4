pub mod registry_client;
