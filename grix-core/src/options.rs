//! Algorithm selectors and solver options.
//!
//! Every graph detector family is backed by a configurable algorithm.
//! Selector strings follow the historical switchboard names; selectors
//! whose dedicated dynamic data structures are not implemented here fall
//! back to the closest supported algorithm and log a warning.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CoreError;

/// Max-flow algorithm selector (`opt_maxflow_alg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaxflowAlg {
    /// Edmonds–Karp (BFS augmenting paths).
    EdmondsKarp,
    /// Edmonds–Karp over adjacency lists.
    EdmondsKarpAdj,
    /// Edmonds–Karp with dynamic updates.
    EdmondsKarpDynamic,
    /// Dinitz (level graph + blocking flow).
    #[default]
    Dinitz,
    /// Dinitz with link-cut trees.
    DinitzLinkCut,
    /// Kohli–Torr dynamic min-cut.
    KohliTorr,
}

impl FromStr for MaxflowAlg {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edmondskarp" => Ok(Self::EdmondsKarp),
            "edmondskarp-adj" => Ok(Self::EdmondsKarpAdj),
            "edmondskarp-dynamic" => Ok(Self::EdmondsKarpDynamic),
            "dinitz" => Ok(Self::Dinitz),
            "dinitz-linkcut" => Ok(Self::DinitzLinkCut),
            "kohli-torr" => Ok(Self::KohliTorr),
            _ => Err(CoreError::UnknownAlgorithm {
                option: "opt_maxflow_alg".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Reachability / connectivity algorithm selector (`opt_reach_alg`,
/// `opt_con_alg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReachAlg {
    /// Breadth-first search.
    #[default]
    Bfs,
    /// Depth-first search.
    Dfs,
    /// Dijkstra (treats reach as distance < ∞).
    Dijkstra,
    /// Eager CNF encoding.
    Cnf,
    /// Ramalingam–Reps dynamic SSSP.
    RamalReps,
    /// Batched Ramalingam–Reps.
    RamalRepsBatch,
    /// Batched Ramalingam–Reps, variant 2.
    RamalRepsBatch2,
}

impl FromStr for ReachAlg {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bfs" => Ok(Self::Bfs),
            "dfs" => Ok(Self::Dfs),
            "dijkstra" => Ok(Self::Dijkstra),
            "cnf" => Ok(Self::Cnf),
            "ramal-reps" => Ok(Self::RamalReps),
            "ramal-reps-batch" => Ok(Self::RamalRepsBatch),
            "ramal-reps-batch2" => Ok(Self::RamalRepsBatch2),
            _ => Err(CoreError::UnknownAlgorithm {
                option: "opt_reach_alg".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Shortest-path algorithm selector (`opt_dist_alg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistAlg {
    /// Dijkstra.
    #[default]
    Dijkstra,
    /// Ramalingam–Reps dynamic SSSP.
    RamalReps,
    /// Batched Ramalingam–Reps.
    RamalRepsBatch,
}

impl FromStr for DistAlg {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dijkstra" => Ok(Self::Dijkstra),
            "ramal-reps" => Ok(Self::RamalReps),
            "ramal-reps-batch" => Ok(Self::RamalRepsBatch),
            _ => Err(CoreError::UnknownAlgorithm {
                option: "opt_dist_alg".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Minimum-spanning-tree algorithm selector (`opt_mst_alg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MstAlg {
    /// Kruskal with union-find.
    #[default]
    Kruskal,
    /// Prim with a binary heap.
    Prim,
    /// Spira–Pan incremental MST.
    SpiraPan,
}

impl FromStr for MstAlg {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kruskal" => Ok(Self::Kruskal),
            "prim" => Ok(Self::Prim),
            "spira-pan" => Ok(Self::SpiraPan),
            _ => Err(CoreError::UnknownAlgorithm {
                option: "opt_mst_alg".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Cycle-detection algorithm selector (`opt_cycle_alg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CycleAlg {
    /// DFS-based cycle search.
    #[default]
    Dfs,
    /// Pearce–Kelly online topological order.
    Pk,
}

impl FromStr for CycleAlg {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dfs" => Ok(Self::Dfs),
            "pk" => Ok(Self::Pk),
            _ => Err(CoreError::UnknownAlgorithm {
                option: "opt_cycle_alg".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// All-pairs reachability selector (`opt_allpairs_alg`,
/// `opt_undir_allpairs_alg`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllPairsAlg {
    /// Floyd–Warshall.
    #[default]
    FloydWarshall,
    /// Repeated Dijkstra.
    Dijkstra,
    /// Thorup dynamic all-pairs.
    Thorup,
}

impl FromStr for AllPairsAlg {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "floyd-warshall" => Ok(Self::FloydWarshall),
            "dijkstra" => Ok(Self::Dijkstra),
            "thorup" => Ok(Self::Thorup),
            _ => Err(CoreError::UnknownAlgorithm {
                option: "opt_allpairs_alg".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Full option set for a solver instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Max-flow algorithm.
    pub maxflow_alg: MaxflowAlg,
    /// Reachability algorithm.
    pub reach_alg: ReachAlg,
    /// Undirected-connectivity algorithm.
    pub con_alg: ReachAlg,
    /// Weighted shortest-path algorithm.
    pub dist_alg: DistAlg,
    /// MST algorithm.
    pub mst_alg: MstAlg,
    /// Cycle-detection algorithm.
    pub cycle_alg: CycleAlg,
    /// Directed all-pairs algorithm.
    pub allpairs_alg: AllPairsAlg,
    /// Undirected all-pairs algorithm.
    pub undir_allpairs_alg: AllPairsAlg,
    /// Minimize reachability conflicts to an s–t min cut.
    pub conflict_min_cut: bool,
    /// Minimize max-flow conflicts to an s–t min cut.
    pub maxflow_conflict_min_cut: bool,
    /// Let theory plugins suggest decisions before VSIDS.
    pub theory_decisions: bool,
    /// VSIDS activity decay factor.
    pub var_decay: f64,
    /// Clause activity decay factor.
    pub clause_decay: f64,
    /// Base restart interval in conflicts (scaled by the Luby sequence).
    pub restart_first: u32,
    /// Enable root-level variable elimination and subsumption.
    pub preprocessing: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            maxflow_alg: MaxflowAlg::default(),
            reach_alg: ReachAlg::default(),
            con_alg: ReachAlg::default(),
            dist_alg: DistAlg::default(),
            mst_alg: MstAlg::default(),
            cycle_alg: CycleAlg::default(),
            allpairs_alg: AllPairsAlg::default(),
            undir_allpairs_alg: AllPairsAlg::default(),
            conflict_min_cut: true,
            maxflow_conflict_min_cut: true,
            theory_decisions: true,
            var_decay: 0.95,
            clause_decay: 0.999,
            restart_first: 100,
            preprocessing: true,
        }
    }
}

impl SolverOptions {
    /// Parse `-name=value` style option strings.
    ///
    /// Unrecognized option names are an error; so are unrecognized
    /// selector values.
    pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<Self, CoreError> {
        let mut opts = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            let stripped = arg.strip_prefix('-').unwrap_or(arg);
            let (name, value) = stripped.split_once('=').unwrap_or((stripped, "true"));
            match name {
                "opt_maxflow_alg" => opts.maxflow_alg = value.parse()?,
                "opt_reach_alg" => opts.reach_alg = value.parse()?,
                "opt_con_alg" => opts.con_alg = value.parse()?,
                "opt_dist_alg" => opts.dist_alg = value.parse()?,
                "opt_mst_alg" => opts.mst_alg = value.parse()?,
                "opt_cycle_alg" => opts.cycle_alg = value.parse()?,
                "opt_allpairs_alg" => opts.allpairs_alg = value.parse()?,
                "opt_undir_allpairs_alg" => opts.undir_allpairs_alg = value.parse()?,
                "opt_conflict_min_cut" => opts.conflict_min_cut = parse_bool(name, value)?,
                "opt_maxflow_conflict_min_cut" => {
                    opts.maxflow_conflict_min_cut = parse_bool(name, value)?;
                }
                "opt_decide_theories" => opts.theory_decisions = parse_bool(name, value)?,
                "opt_preprocessing" => opts.preprocessing = parse_bool(name, value)?,
                _ => {
                    return Err(CoreError::UnknownOption {
                        option: name.to_string(),
                    });
                }
            }
        }
        Ok(opts)
    }
}

fn parse_bool(option: &str, value: &str) -> Result<bool, CoreError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(CoreError::UnknownAlgorithm {
            option: option.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selectors() {
        let opts = SolverOptions::parse_args(&[
            "-opt_maxflow_alg=edmondskarp",
            "-opt_reach_alg=dfs",
            "-opt_mst_alg=prim",
            "-opt_conflict_min_cut=false",
        ])
        .unwrap();
        assert_eq!(opts.maxflow_alg, MaxflowAlg::EdmondsKarp);
        assert_eq!(opts.reach_alg, ReachAlg::Dfs);
        assert_eq!(opts.mst_alg, MstAlg::Prim);
        assert!(!opts.conflict_min_cut);
    }

    #[test]
    fn test_unknown_algorithm_is_an_error() {
        let err = SolverOptions::parse_args(&["-opt_maxflow_alg=pushrelabel"]).unwrap_err();
        assert!(err.to_string().contains("pushrelabel"));
    }

    #[test]
    fn test_unknown_option_is_an_error() {
        assert!(SolverOptions::parse_args(&["-opt_no_such_thing=1"]).is_err());
    }

    #[test]
    fn test_all_switchboard_names_parse() {
        for s in [
            "edmondskarp",
            "edmondskarp-adj",
            "edmondskarp-dynamic",
            "dinitz",
            "dinitz-linkcut",
            "kohli-torr",
        ] {
            s.parse::<MaxflowAlg>().unwrap();
        }
        for s in [
            "bfs",
            "dfs",
            "dijkstra",
            "cnf",
            "ramal-reps",
            "ramal-reps-batch",
            "ramal-reps-batch2",
        ] {
            s.parse::<ReachAlg>().unwrap();
        }
    }
}
