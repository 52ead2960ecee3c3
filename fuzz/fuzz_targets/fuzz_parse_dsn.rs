#![no_main]

use cloudsql_connect::{InstanceRef, PrincipalIdentity, ProvisionConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = ProvisionConfig::parse_dsn(s) {
        assert!(config.pool.capacity() > 0);
    }
    if let Ok(instance) = s.parse::<InstanceRef>() {
        assert_eq!(instance.to_string().parse::<InstanceRef>().ok(), Some(instance));
    }
    let _ = PrincipalIdentity::parse(s);
});
