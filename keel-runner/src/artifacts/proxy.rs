//! Proxy script generator
//!
//! Build commands reach linked services on `localhost:<port>`. The proxy
//! script forwards each exposed service port to the service container's
//! private address, so the build needs no knowledge of container networking.

use std::collections::BTreeMap;

use crate::runtime::ContainerInfo;

const HEADER: &str = "#!/bin/bash\nset +e\n";

/// Port to address forwarding rules
#[derive(Debug, Clone, Default)]
pub struct Proxy {
    rules: BTreeMap<String, String>,
}

impl Proxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards `port` on localhost to the same port on `address`
    ///
    /// A later rule for the same port replaces the earlier one.
    pub fn set(&mut self, port: &str, address: &str) {
        self.rules.insert(port.to_string(), address.to_string());
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Renders the script, one forward per port in port order
    pub fn to_script(&self) -> String {
        let mut script = String::from(HEADER);
        for (port, address) in &self.rules {
            script.push_str(&format!(
                "[ -x /usr/bin/socat ] && socat TCP-LISTEN:{port},fork TCP:{address}:{port} &\n"
            ));
        }
        script
    }
}

/// Generates the proxy rules for the running service containers
pub fn generate(services: &[ContainerInfo]) -> Proxy {
    let mut proxy = Proxy::new();
    for service in services {
        for port in &service.ports {
            proxy.set(port, &service.ip_address);
        }
    }
    proxy
}
