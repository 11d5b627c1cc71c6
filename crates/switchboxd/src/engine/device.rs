/// The switchbox the engine talks to.
///
/// Only builds endpoint URLs. The paths are fixed by the device firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    ip: String,
}

impl Device {
    pub fn new(ip: impl Into<String>) -> Self {
        Self { ip: ip.into() }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Full relay state query.
    pub fn status_url(&self) -> String {
        format!("http://{}/api/relay/state", self.ip)
    }

    /// Switch command for one relay.
    pub fn command_url(&self, relay: usize, on: bool) -> String {
        format!("http://{}/s/{}/{}", self.ip, relay, u8::from(on))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let device = Device::new("10.0.0.5");
        assert_eq!(device.status_url(), "http://10.0.0.5/api/relay/state");
        assert_eq!(device.command_url(0, true), "http://10.0.0.5/s/0/1");
        assert_eq!(device.command_url(1, false), "http://10.0.0.5/s/1/0");
    }
}
