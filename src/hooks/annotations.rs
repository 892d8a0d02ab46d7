//! Pod annotations that request CPU isolation.

use std::collections::HashMap;

use super::{Error, Result};

pub const CPU_LOAD_BALANCING: &str = "cpu-load-balancing.crio.io";
pub const CPU_QUOTA: &str = "cpu-quota.crio.io";
pub const IRQ_LOAD_BALANCING: &str = "irq-load-balancing.crio.io";
pub const CPU_C_STATES: &str = "cpu-c-states.crio.io";
pub const CPU_FREQ_GOVERNOR: &str = "cpu-freq-governor.crio.io";
/// Prefix of the per-container `cpu-shared.crio.io/<container name>` annotation.
pub const CPU_SHARED: &str = "cpu-shared.crio.io";

const VALUE_TRUE: &str = "true";
const VALUE_DISABLE: &str = "disable";
const VALUE_ENABLE: &str = "enable";
const MAX_LATENCY_PREFIX: &str = "max_latency:";

/// pm_qos_resume_latency_us value that forbids every c-state.
const LATENCY_NO_CSTATES: &str = "n/a";

fn deprecation_warning(annotation: &str) -> String {
    format!("The usage of the annotation {annotation:?} with value \"true\" will be deprecated under 1.21")
}

/// Whether `annotation` asks for the feature to be turned off. `true` still works but warns.
fn is_disabled(annotations: &HashMap<String, String>, annotation: &str) -> bool {
    match annotations.get(annotation).map(String::as_str) {
        Some(VALUE_TRUE) => {
            log::warn!("{}", deprecation_warning(annotation));
            true
        }
        Some(VALUE_DISABLE) => true,
        _ => false,
    }
}

pub fn cpu_load_balancing_disabled(annotations: &HashMap<String, String>) -> bool {
    is_disabled(annotations, CPU_LOAD_BALANCING)
}

pub fn cpu_quota_disabled(annotations: &HashMap<String, String>) -> bool {
    is_disabled(annotations, CPU_QUOTA)
}

pub fn irq_load_balancing_disabled(annotations: &HashMap<String, String>) -> bool {
    is_disabled(annotations, IRQ_LOAD_BALANCING)
}

pub fn c_states(annotations: &HashMap<String, String>) -> Option<&str> {
    annotations.get(CPU_C_STATES).map(String::as_str)
}

pub fn freq_governor(annotations: &HashMap<String, String>) -> Option<&str> {
    annotations.get(CPU_FREQ_GOVERNOR).map(String::as_str)
}

/// Whether container `name` asked for the shared CPU pool.
pub fn shared_cpus_requested(annotations: &HashMap<String, String>, name: &str) -> bool {
    annotations
        .get(&format!("{CPU_SHARED}/{name}"))
        .is_some_and(|value| value == VALUE_ENABLE)
}

/// Translates a c-state annotation value into a `pm_qos_resume_latency_us` value.
///
/// `enable` allows every c-state (`0`), `disable` none (`n/a`), and `max_latency:<n>` only those
/// waking up within `n` microseconds.
///
/// # Errors
///
/// Returns [`Error::InvalidAnnotation`] for any other value, including a non-positive latency.
pub fn c_state_latency(value: &str) -> Result<String> {
    let invalid = || Error::InvalidAnnotation {
        annotation: CPU_C_STATES,
        value: value.to_owned(),
    };
    match value {
        VALUE_ENABLE => Ok("0".to_owned()),
        VALUE_DISABLE => Ok(LATENCY_NO_CSTATES.to_owned()),
        _ => {
            let latency: i64 = value
                .strip_prefix(MAX_LATENCY_PREFIX)
                .ok_or_else(invalid)?
                .parse()
                .map_err(|_| invalid())?;
            if latency <= 0 {
                return Err(invalid());
            }
            Ok(latency.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_disable_values() {
        assert!(cpu_load_balancing_disabled(&annotations(&[(CPU_LOAD_BALANCING, "true")])));
        assert!(cpu_load_balancing_disabled(&annotations(&[(CPU_LOAD_BALANCING, "disable")])));
        assert!(!cpu_load_balancing_disabled(&annotations(&[(CPU_LOAD_BALANCING, "enable")])));
        assert!(!cpu_quota_disabled(&annotations(&[(CPU_LOAD_BALANCING, "disable")])));
        assert!(irq_load_balancing_disabled(&annotations(&[(IRQ_LOAD_BALANCING, "disable")])));
        assert!(!irq_load_balancing_disabled(&HashMap::new()));
    }

    #[test]
    fn test_shared_cpus_requested() {
        let requested = annotations(&[("cpu-shared.crio.io/app", "enable")]);
        assert!(shared_cpus_requested(&requested, "app"));
        assert!(!shared_cpus_requested(&requested, "sidecar"));
        assert!(!shared_cpus_requested(
            &annotations(&[("cpu-shared.crio.io/app", "disable")]),
            "app"
        ));
    }

    #[test]
    fn test_c_state_latency() {
        assert_eq!(c_state_latency("enable").unwrap(), "0");
        assert_eq!(c_state_latency("disable").unwrap(), "n/a");
        assert_eq!(c_state_latency("max_latency:10").unwrap(), "10");
        for invalid in ["max_latency:0", "max_latency:-3", "max_latency:x", "off", ""] {
            match c_state_latency(invalid) {
                Err(Error::InvalidAnnotation { annotation, value }) => {
                    assert_eq!(annotation, CPU_C_STATES);
                    assert_eq!(value, invalid);
                }
                other => panic!("expected InvalidAnnotation for {invalid:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_optional_annotations() {
        let set = annotations(&[(CPU_FREQ_GOVERNOR, "performance")]);
        assert_eq!(freq_governor(&set), Some("performance"));
        assert_eq!(c_states(&set), None);
    }
}
