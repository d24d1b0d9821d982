//! Factor-weighted strategy
//!
//! Each live server gets a target share of every table proportional to its
//! [`BalanceFactor`] weight: `T_s = regions * w_s / sum(w)`. Regions on dead
//! servers are placed first, then regions flow one at a time from the most
//! over-target server to the most under-target one for as long as that
//! strictly lowers `sum((A_s - T_s)^2 / T_s)`.
//!
//! Both ends of every move must be at least half a region off target, so no
//! server's deviation from its share ever grows. Ties are broken by the load
//! accumulated over tables planned earlier (large tables go first), then by
//! server order.

use regionctl_core::{MovePlan, RegionMove, ServerLoad, TableName};
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use crate::factor::BalanceFactor;
use crate::planner::{BalanceStrategy, Placement, Result, StrategyKind};
use crate::snapshot::ClusterSnapshot;

/// Smallest off-target amount that justifies moving a region
const MIN_IMBALANCE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct FactorWeightedStrategy {
    factor: BalanceFactor,
}

/// Candidate score: higher `primary` wins, then lower `secondary`
#[derive(Debug, Clone, Copy)]
struct Score {
    primary: f64,
    secondary: f64,
}

impl Score {
    fn beats(&self, other: &Score) -> bool {
        match self.primary.partial_cmp(&other.primary) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => self.secondary < other.secondary,
            _ => false,
        }
    }
}

/// First server (in roster order) with the best score
fn pick(candidates: impl Iterator<Item = (usize, Score)>) -> Option<usize> {
    let mut best: Option<(usize, Score)> = None;
    for (idx, score) in candidates {
        match &best {
            Some((_, current)) if !score.beats(current) => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}

impl FactorWeightedStrategy {
    pub fn new(factor: BalanceFactor) -> Self {
        Self { factor }
    }

    fn weights(&self, snapshot: &ClusterSnapshot) -> Vec<f64> {
        let empty = ServerLoad::default();
        snapshot
            .roster()
            .iter()
            .map(|s| self.factor.weight(snapshot.load(s).unwrap_or(&empty)))
            .collect()
    }
}

impl BalanceStrategy for FactorWeightedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FactorWeighted
    }

    #[instrument(skip_all, fields(factor = %self.factor))]
    fn place(&self, snapshot: &ClusterSnapshot, tables: &BTreeSet<TableName>) -> Result<Placement> {
        let roster = snapshot.roster();
        let weights = self.weights(snapshot);
        let total_weight: f64 = weights.iter().sum();
        let mut plan = MovePlan::new(roster, snapshot.regions_in(tables));

        // Regions placed per server over the tables planned so far
        let mut placed = vec![0usize; roster.len()];
        let relative_load = |placed: &[usize], s: usize| placed[s] as f64 / weights[s];

        let mut ordered: Vec<(usize, &TableName)> = tables
            .iter()
            .map(|t| (snapshot.regions_of(t).len(), t))
            .collect();
        ordered.sort_by_key(|&(count, t)| (Reverse(count), t));

        for (count, table) in ordered {
            let regions = snapshot.regions_of(table);
            let mut hosted: Vec<Vec<usize>> = vec![Vec::new(); roster.len()];
            let mut orphans = Vec::new();
            for (i, (_, host)) in regions.iter().enumerate() {
                match roster.binary_search(host) {
                    Ok(s) => hosted[s].push(i),
                    Err(_) => orphans.push(i),
                }
            }

            if count <= 1 {
                for (s, list) in hosted.iter().enumerate() {
                    placed[s] += list.len();
                }
                continue;
            }

            let target: Vec<f64> = weights
                .iter()
                .map(|w| count as f64 * w / total_weight)
                .collect();

            for region in orphans {
                let receiver = pick((0..roster.len()).map(|s| {
                    let assigned = hosted[s].len() as f64;
                    (
                        s,
                        Score {
                            primary: (target[s] - assigned) / target[s],
                            secondary: relative_load(&placed, s),
                        },
                    )
                }));
                if let Some(s) = receiver {
                    hosted[s].push(region);
                }
            }

            loop {
                let donor = pick(
                    (0..roster.len())
                        .filter(|&s| hosted[s].len() as f64 - target[s] >= MIN_IMBALANCE)
                        .map(|s| {
                            let surplus = hosted[s].len() as f64 - target[s];
                            (
                                s,
                                Score {
                                    primary: surplus / target[s],
                                    secondary: -relative_load(&placed, s),
                                },
                            )
                        }),
                );
                let receiver = pick(
                    (0..roster.len())
                        .filter(|&s| target[s] - hosted[s].len() as f64 >= MIN_IMBALANCE)
                        .map(|s| {
                            let deficit = target[s] - hosted[s].len() as f64;
                            (
                                s,
                                Score {
                                    primary: deficit / target[s],
                                    secondary: relative_load(&placed, s),
                                },
                            )
                        }),
                );
                let (Some(d), Some(r)) = (donor, receiver) else {
                    break;
                };

                let surplus = hosted[d].len() as f64 - target[d];
                let deficit = target[r] - hosted[r].len() as f64;
                let delta = (1.0 - 2.0 * surplus) / target[d] + (1.0 - 2.0 * deficit) / target[r];
                if delta >= 0.0 {
                    break;
                }

                // Last region in start-key order
                let Some(pos) = hosted[d]
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, i)| **i)
                    .map(|(pos, _)| pos)
                else {
                    break;
                };
                let region = hosted[d].swap_remove(pos);
                hosted[r].push(region);
            }

            let mut destinations: Vec<(usize, usize)> = hosted
                .iter()
                .enumerate()
                .flat_map(|(s, list)| list.iter().map(move |&i| (i, s)))
                .collect();
            destinations.sort_unstable();

            let mut table_moves = 0;
            for (i, s) in destinations {
                let (region, host) = regions[i];
                if host != &roster[s] {
                    plan.push(RegionMove {
                        region: region.clone(),
                        source: host.clone(),
                        destination: roster[s].clone(),
                    })?;
                    table_moves += 1;
                }
            }
            debug!(table = %table, regions = count, moves = table_moves, "Planned table");

            for (s, list) in hosted.iter().enumerate() {
                placed[s] += list.len();
            }
        }

        Ok(Placement::Moves(plan))
    }
}
