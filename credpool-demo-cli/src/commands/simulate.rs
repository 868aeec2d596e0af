//! Simulate command - drive synthetic traffic through the pool
//!
//! Each request selects a key, draws an HTTP status from the configured
//! failure and throttle rates, and reports the outcome. No network calls
//! are made.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use credpool_lib::cooldown::HealthProbe;
use credpool_lib::health::Outcome;
use credpool_lib::rotation::RotationStrategy;
use credpool_lib::store::Credential;
use credpool_lib::{AdmissionError, CredpoolError, Service};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::ui;

/// Shape of the synthetic traffic
#[derive(Clone, Copy, Debug)]
pub struct Traffic {
    pub requests: u32,
    pub failure_rate: f64,
    pub throttle_rate: f64,
    pub seed: Option<u64>,
    pub strategy: Option<RotationStrategy>,
}

impl Traffic {
    fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("failure-rate", self.failure_rate),
            ("throttle-rate", self.throttle_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(anyhow!("--{} must be between 0 and 1", name));
            }
        }
        if self.failure_rate + self.throttle_rate > 1.0 {
            return Err(anyhow!("failure and throttle rates add up to more than 1"));
        }
        Ok(())
    }

    /// HTTP status of the next synthetic call
    fn draw_status(&self, rng: &mut StdRng) -> u16 {
        let roll: f64 = rng.gen();
        if roll < self.throttle_rate {
            429
        } else if roll < self.throttle_rate + self.failure_rate {
            503
        } else {
            200
        }
    }
}

/// Probe that recovers keys with the simulated success rate
struct SimulatedProbe {
    success_rate: f64,
    rng: Mutex<StdRng>,
}

#[async_trait]
impl HealthProbe for SimulatedProbe {
    async fn probe(&self, credential: &Credential) -> credpool_lib::Result<()> {
        let roll: f64 = self.rng.lock().unwrap_or_else(|e| e.into_inner()).gen();
        if roll < self.success_rate {
            Ok(())
        } else {
            Err(CredpoolError::Probe {
                id: credential.id,
                reason: "simulated probe failure".to_string(),
            })
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    ok: u32,
    failed: u32,
    throttled: u32,
    denied: u32,
}

pub async fn run(storage_dir: &Path, service: Service, traffic: Traffic, verbose: bool) -> Result<()> {
    traffic.validate()?;
    ui::header(&format!("Simulating {} requests to {}", traffic.requests, service.display_name()));

    let mut rng = match traffic.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let probe = Arc::new(SimulatedProbe {
        success_rate: 1.0 - traffic.failure_rate,
        rng: Mutex::new(StdRng::seed_from_u64(rng.gen())),
    });
    let pool = super::open_pool_with(storage_dir, probe).await?;
    if let Some(strategy) = traffic.strategy {
        pool.set_rotation_strategy(service, strategy);
    }
    ui::key_value("Strategy", &pool.rotation_strategy(service).to_string());

    let progress = ui::progress(u64::from(traffic.requests), "requests");
    let mut tally = Tally::default();
    for _ in 0..traffic.requests {
        progress.inc(1);
        pool.reactivate_cooled_down_keys().await;

        let handle = match pool.select_credential(service) {
            Ok(handle) => handle,
            Err(AdmissionError::UnknownService { .. }) => {
                progress.finish_and_clear();
                return Err(anyhow!(
                    "No keys registered for {}. Run 'credpool-demo register {}' first.",
                    service.display_name(),
                    service
                ));
            }
            Err(e) => {
                tally.denied += 1;
                tracing::debug!(error = %e, "request not admitted");
                continue;
            }
        };

        let status = traffic.draw_status(&mut rng);
        let latency = Duration::from_millis(rng.gen_range(40..400));
        match status {
            200 => tally.ok += 1,
            429 => tally.throttled += 1,
            _ => tally.failed += 1,
        }
        let transition = pool.report_outcome(handle, Outcome::from_http_status(status, latency))?;
        if verbose && transition.changed() {
            ui::info(&format!(
                "{} moved {} -> {}",
                transition.credential_id.short(),
                ui::health(transition.from),
                ui::health(transition.to)
            ));
        }
    }
    progress.finish_and_clear();

    pool.perform_health_check();
    pool.shutdown().await?;

    ui::header("Results");
    ui::key_value("Succeeded", &tally.ok.to_string());
    ui::key_value("Failed", &tally.failed.to_string());
    ui::key_value("Throttled", &tally.throttled.to_string());
    ui::key_value("Not admitted", &tally.denied.to_string());
    if tally.denied > 0 {
        ui::warning("Some requests found no admissible key; add keys or wait for the next window");
    }
    ui::separator();
    println!("{}", pool.generate_rotation_report());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_are_validated() {
        let mut traffic = Traffic {
            requests: 10,
            failure_rate: 0.5,
            throttle_rate: 0.4,
            seed: Some(1),
            strategy: None,
        };
        assert!(traffic.validate().is_ok());
        traffic.throttle_rate = 0.6;
        assert!(traffic.validate().is_err());
        traffic.throttle_rate = -0.1;
        assert!(traffic.validate().is_err());
    }

    #[test]
    fn test_draw_status_follows_rates() {
        let traffic = Traffic {
            requests: 0,
            failure_rate: 0.0,
            throttle_rate: 1.0,
            seed: None,
            strategy: Some(RotationStrategy::RoundRobin),
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..50).all(|_| traffic.draw_status(&mut rng) == 429));

        let clean = Traffic {
            throttle_rate: 0.0,
            ..traffic
        };
        assert!((0..50).all(|_| clean.draw_status(&mut rng) == 200));
    }
}
