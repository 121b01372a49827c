//! config-rs/lib.rs
//! Shared configuration utilities for consistent service configuration
//! Provides standardized functions for port/address management

use std::env;
use std::net::SocketAddr;

/// Get service port from environment variables with proper fallback
///
/// # Arguments
/// * `service_name` - The name of the service (e.g., "MOT_SUMMARY")
/// * `default_port` - The default port to use if not specified in environment
///
/// # Returns
/// The port number to use for the service
pub fn get_service_port(service_name: &str, default_port: u16) -> u16 {
    let var_name = format!("{}_SERVICE_PORT", service_name.to_uppercase());
    env::var(&var_name)
        .unwrap_or_else(|_| default_port.to_string())
        .parse::<u16>()
        .unwrap_or_else(|_| {
            log::warn!("Invalid port in {}, using default {}", var_name, default_port);
            default_port
        })
}

/// Create a SocketAddr for binding a service
///
/// # Arguments
/// * `service_name` - The name of the service (e.g., "MOT_SUMMARY")
/// * `default_port` - The default port to use if not specified in environment
///
/// # Returns
/// A SocketAddr configured with the appropriate bind address and port
pub fn get_bind_address(service_name: &str, default_port: u16) -> SocketAddr {
    let var_name = format!("{}_SERVICE_ADDR", service_name.to_uppercase());

    // Check if there's a full address override
    if let Ok(addr_str) = env::var(&var_name) {
        if let Ok(addr) = addr_str.parse::<SocketAddr>() {
            return addr;
        } else {
            // Check if it's in http://host:port format
            if addr_str.starts_with("http://") || addr_str.starts_with("https://") {
                let addr_parts = addr_str.split("://").collect::<Vec<&str>>();
                if addr_parts.len() > 1 {
                    if let Ok(addr) = addr_parts[1].parse::<SocketAddr>() {
                        return addr;
                    }
                }
            }
            log::warn!("Invalid address format in {}, using default", var_name);
        }
    }

    // Use the port from environment or default
    let port = get_service_port(service_name, default_port);
    format!("0.0.0.0:{}", port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)))
}

/// Get service name for logging and monitoring
///
/// # Arguments
/// * `service_name` - The name of the service (e.g., "MOT_SUMMARY")
///
/// # Returns
/// A formatted service name suitable for logging
pub fn get_formatted_service_name(service_name: &str) -> String {
    match service_name {
        "MOT_SUMMARY" => "mot-summary-service".to_string(),
        _ => format!("{}-service", service_name.to_lowercase()),
    }
}
