// src/core/scanner/mod.rs

// Built-in network probes that back the recon and TLS-analysis stages. These
// are the only places the core touches the network itself; everything else
// goes through the external tool adapters.

pub mod recon;
pub mod tls_inspector;
