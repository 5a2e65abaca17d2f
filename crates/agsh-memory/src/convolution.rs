// Decayed-amplitude convolution math (§4.6). Kept pure (no DB access) so
// the decay law itself — and the testable laws in SPEC_FULL.md §8 — can be
// checked without a database.

use agsh_types::{Megram, Potentials};
use chrono::{DateTime, Utc};

/// Days since `max(created_at, last_recalled_at)`, floored at zero.
pub fn delta_t_days(created_at: DateTime<Utc>, last_recalled_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let reference = match last_recalled_at {
        Some(recalled) if recalled > created_at => recalled,
        _ => created_at,
    };
    let seconds = (now - reference).num_seconds() as f64;
    (seconds / 86_400.0).max(0.0)
}

/// `f_i · exp(−k_i · Δt_i)` — the decayed weight of one Megram.
pub fn decayed_weight(megram: &Megram, delta_t_days: f64) -> f64 {
    megram.f * (-megram.k * delta_t_days).exp()
}

/// One entry's contribution: `(id, last_recalled_at)` pairs are supplied
/// by the caller since recall timestamps live in a separate table.
pub struct ConvolutionInput<'a> {
    pub megram: &'a Megram,
    pub last_recalled_at: Option<DateTime<Utc>>,
}

/// `att = Σ f_i·exp(−k_i·Δt_i)`, `dec = Σ σ_i·f_i·exp(−k_i·Δt_i)`.
/// Convolution linearity (§8): `N` independent entries at the same tags
/// sum their individual `att`/`dec` contributions exactly.
pub fn convolve(entries: &[ConvolutionInput<'_>], now: DateTime<Utc>) -> Potentials {
    let mut attention = 0.0;
    let mut decision = 0.0;
    for entry in entries {
        let dt = delta_t_days(entry.megram.created_at, entry.last_recalled_at, now);
        let weight = decayed_weight(entry.megram, dt);
        attention += weight;
        decision += entry.megram.sigma * weight;
    }
    Potentials {
        attention,
        decision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_types::{Directive, MegramLevel};
    use chrono::Duration;
    use uuid::Uuid;

    fn megram(f: f64, sigma: f64, k: f64, created_at: DateTime<Utc>) -> Megram {
        Megram {
            id: Uuid::new_v4(),
            level: MegramLevel::M,
            created_at,
            space: "s".into(),
            entity: "e".into(),
            content: "c".into(),
            state: Directive::Refine,
            f,
            sigma,
            k,
        }
    }

    #[test]
    fn timeless_megram_never_decays() {
        let now = Utc::now();
        let ancient = now - Duration::days(3650);
        let m = megram(0.9, 1.0, 0.0, ancient);
        let dt = delta_t_days(m.created_at, None, now);
        assert_eq!(decayed_weight(&m, dt), 0.9);
    }

    #[test]
    fn convolution_is_linear_across_independent_entries() {
        let now = Utc::now();
        let a = megram(0.3, 0.5, 0.1, now);
        let b = megram(0.4, -0.2, 0.2, now);
        let combined = convolve(
            &[
                ConvolutionInput {
                    megram: &a,
                    last_recalled_at: None,
                },
                ConvolutionInput {
                    megram: &b,
                    last_recalled_at: None,
                },
            ],
            now,
        );
        let solo_a = convolve(
            &[ConvolutionInput {
                megram: &a,
                last_recalled_at: None,
            }],
            now,
        );
        let solo_b = convolve(
            &[ConvolutionInput {
                megram: &b,
                last_recalled_at: None,
            }],
            now,
        );
        assert!((combined.attention - (solo_a.attention + solo_b.attention)).abs() < 1e-9);
        assert!((combined.decision - (solo_a.decision + solo_b.decision)).abs() < 1e-9);
    }

    #[test]
    fn gc_boundary_scenario_from_spec() {
        // k=0.5, f=0.1, created 30 days ago: att = 0.1*exp(-15) ~ 0 < 0.1
        let now = Utc::now();
        let m = megram(0.1, 0.0, 0.5, now - Duration::days(30));
        let dt = delta_t_days(m.created_at, None, now);
        let att = decayed_weight(&m, dt);
        assert!(att < 0.1);
    }
}
