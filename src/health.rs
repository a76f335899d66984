// src/health.rs
//! Per-component health, process-local. Callers always get copies.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Health {
    components: RwLock<HashMap<String, HealthStatus>>,
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, component: &str, message: &str) {
        self.update(component, |s, now| {
            s.healthy = true;
            s.last_success = Some(now);
            s.last_error = None;
            s.message = message.to_string();
        });
    }

    pub fn set_unhealthy(&self, component: &str, err: &anyhow::Error) {
        let text = format!("{err:#}");
        self.update(component, |s, _| {
            s.healthy = false;
            s.last_error = Some(text.clone());
            s.message = text.clone();
        });
    }

    fn update(&self, component: &str, apply: impl FnOnce(&mut HealthStatus, DateTime<Utc>)) {
        let mut map = self.components.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let status = map.entry(component.to_string()).or_insert_with(|| HealthStatus {
            healthy: false,
            last_check: now,
            last_success: None,
            last_error: None,
            message: String::new(),
        });
        // wall clocks can step back; last_check never does
        let now = now.max(status.last_check);
        status.last_check = now;
        apply(status, now);
    }

    pub fn get_status(&self, component: &str) -> Option<HealthStatus> {
        let map = self.components.read().unwrap_or_else(|e| e.into_inner());
        map.get(component).cloned()
    }

    pub fn get_all_statuses(&self) -> HashMap<String, HealthStatus> {
        self.components
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// True when no component is unhealthy (vacuously true when empty).
    pub fn is_overall_healthy(&self) -> bool {
        self.components
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .all(|s| s.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn empty_is_healthy() {
        let h = Health::new();
        assert!(h.is_overall_healthy());
        assert!(h.get_status("publisher").is_none());
    }

    #[test]
    fn unhealthy_then_recovered() {
        let h = Health::new();
        h.set_unhealthy("publisher", &anyhow!("auth failed"));
        assert!(!h.is_overall_healthy());
        let s = h.get_status("publisher").unwrap();
        assert_eq!(s.last_error.as_deref(), Some("auth failed"));
        assert!(s.last_success.is_none());

        h.set_healthy("publisher", "ok");
        let s2 = h.get_status("publisher").unwrap();
        assert!(s2.healthy);
        assert!(s2.last_error.is_none());
        assert_eq!(s2.message, "ok");
        assert!(s2.last_check >= s.last_check);
        assert!(h.is_overall_healthy());
    }

    #[test]
    fn returned_statuses_are_copies() {
        let h = Health::new();
        h.set_healthy("index", "loaded 10 quotes");
        let mut all = h.get_all_statuses();
        all.get_mut("index").unwrap().healthy = false;
        assert!(h.get_status("index").unwrap().healthy);
    }

    #[test]
    fn error_chain_is_kept_in_message() {
        let h = Health::new();
        let err = anyhow!("connection refused").context("post cycle");
        h.set_unhealthy("poster", &err);
        assert_eq!(
            h.get_status("poster").unwrap().message,
            "post cycle: connection refused"
        );
    }
}
