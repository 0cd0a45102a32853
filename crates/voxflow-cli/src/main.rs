//! voxflow CLI: marker flow estimation and label propagation for
//! time-lapse volumes.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use voxflow::{
    io, BackendKind, FlowDirection, FlowInterpolator, MatchDirection, Propagation,
    SparseFlowTable, TrackConfig, Tracker, UnmatchedPolicy,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "voxflow")]
#[command(about = "Track sparse markers through a volumetric time-lapse and propagate instance labels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link markers between consecutive frames and write the sparse flow table.
    Flow(CliFlowArgs),

    /// Build (or load) the flow table and propagate labels through the sequence.
    Track(CliTrackArgs),

    /// Interpolate displacements at given points from a flow table.
    Interpolate(CliInterpolateArgs),

    /// Print a summary of a flow table.
    FlowInfo {
        /// Path to a flow table (JSON).
        #[arg(long)]
        flow: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct CliFlowArgs {
    /// Path to the input sequence (JSON).
    #[arg(long)]
    sequence: PathBuf,

    /// Path to write the flow table (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Path to write per-pair link details (JSON).
    #[arg(long)]
    links_out: Option<PathBuf>,

    #[command(flatten)]
    tuning: CliTuningArgs,
}

#[derive(Debug, Clone, Args)]
struct CliTrackArgs {
    /// Path to the input sequence (JSON).
    #[arg(long)]
    sequence: PathBuf,

    /// Path to write the propagated labels (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Reuse an existing flow table instead of running the flow pass.
    #[arg(long)]
    flow: Option<PathBuf>,

    /// Also write the flow table built by this run (JSON).
    #[arg(long, conflicts_with = "flow")]
    flow_out: Option<PathBuf>,

    #[command(flatten)]
    tuning: CliTuningArgs,
}

#[derive(Debug, Clone, Args)]
struct CliInterpolateArgs {
    /// Path to a flow table (JSON).
    #[arg(long)]
    flow: PathBuf,

    /// Frame the query points belong to.
    #[arg(long)]
    frame: usize,

    /// Query point `z,y,x` in voxel units (repeatable).
    #[arg(long = "point", required = true, value_parser = parse_point)]
    points: Vec<[f64; 3]>,

    /// Flow direction.
    #[arg(long, value_enum, default_value_t = DirectionArg::Forward)]
    direction: DirectionArg,

    /// Interpolation neighbourhood radius in micrometers.
    #[arg(long)]
    interp_radius: Option<f64>,
}

#[derive(Debug, Clone, Args, Default)]
struct CliTuningArgs {
    /// Tracking configuration (JSON); flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum marker speed in micrometers per second.
    #[arg(long)]
    max_speed: Option<f64>,

    /// Override the sequence's frame interval in seconds.
    #[arg(long)]
    frame_interval: Option<f64>,

    /// Interpolation neighbourhood radius in micrometers.
    #[arg(long)]
    interp_radius: Option<f64>,

    /// Cap on residual reassignment passes.
    #[arg(long)]
    max_iters: Option<usize>,

    /// Which projections feed voxel matching.
    #[arg(long, value_enum)]
    match_direction: Option<MatchDirectionArg>,

    /// Temporal direction of label propagation.
    #[arg(long, value_enum)]
    propagation: Option<PropagationArg>,

    /// Labeling of voxels that stay unmatched.
    #[arg(long, value_enum)]
    unmatched_policy: Option<UnmatchedPolicyArg>,

    /// Run on the calling thread only.
    #[arg(long)]
    serial: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Forward,
    Backward,
}

impl DirectionArg {
    fn to_core(self) -> FlowDirection {
        match self {
            Self::Forward => FlowDirection::Forward,
            Self::Backward => FlowDirection::Backward,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MatchDirectionArg {
    Forward,
    Backward,
    Both,
}

impl MatchDirectionArg {
    fn to_core(self) -> MatchDirection {
        match self {
            Self::Forward => MatchDirection::Forward,
            Self::Backward => MatchDirection::Backward,
            Self::Both => MatchDirection::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PropagationArg {
    Forward,
    Backward,
}

impl PropagationArg {
    fn to_core(self) -> Propagation {
        match self {
            Self::Forward => Propagation::Forward,
            Self::Backward => Propagation::Backward,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UnmatchedPolicyArg {
    Background,
    FreshLabel,
}

impl UnmatchedPolicyArg {
    fn to_core(self) -> UnmatchedPolicy {
        match self {
            Self::Background => UnmatchedPolicy::Background,
            Self::FreshLabel => UnmatchedPolicy::FreshLabelPerInstance,
        }
    }
}

fn parse_point(s: &str) -> Result<[f64; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected z,y,x but got '{s}'"));
    }
    let mut out = [0.0f64; 3];
    for (dst, p) in out.iter_mut().zip(&parts) {
        *dst = p
            .parse::<f64>()
            .map_err(|e| format!("invalid coordinate '{p}': {e}"))?;
    }
    Ok(out)
}

impl CliTuningArgs {
    fn build_config(&self) -> CliResult<TrackConfig> {
        let mut config = match &self.config {
            Some(path) => TrackConfig::from_json_file(path)?,
            None => TrackConfig::default(),
        };
        if let Some(v) = self.max_speed {
            config.max_link_speed_um_per_s = v;
        }
        if let Some(v) = self.interp_radius {
            config.interpolation.max_radius_um = v;
        }
        if let Some(v) = self.max_iters {
            config.reassign.max_iterations = v;
        }
        if let Some(v) = self.match_direction {
            config.reassign.match_direction = v.to_core();
        }
        if let Some(v) = self.propagation {
            config.propagation = v.to_core();
        }
        if let Some(v) = self.unmatched_policy {
            config.reassign.unmatched_policy = v.to_core();
        }
        if self.serial {
            config.backend = BackendKind::Serial;
        }
        config.validate()?;
        Ok(config)
    }

    fn load_sequence(&self, path: &Path) -> CliResult<voxflow::Sequence> {
        tracing::info!("Loading sequence: {}", path.display());
        let mut seq = io::load_sequence(path)?;
        if let Some(dt) = self.frame_interval {
            seq.frame_interval_s = dt;
        }
        tracing::info!(
            "Sequence: {} frames, shape {:?}, interval {} s",
            seq.n_frames(),
            seq.shape().unwrap_or([0; 3]),
            seq.frame_interval_s
        );
        Ok(seq)
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Flow(args) => run_flow(&args),
        Commands::Track(args) => run_track(&args),
        Commands::Interpolate(args) => run_interpolate(&args),
        Commands::FlowInfo { flow } => run_flow_info(&flow),
    }
}

// ── flow ───────────────────────────────────────────────────────────────

fn run_flow(args: &CliFlowArgs) -> CliResult<()> {
    let config = args.tuning.build_config()?;
    let seq = args.tuning.load_sequence(&args.sequence)?;
    let tracker = Tracker::with_config(config);

    let result = tracker.build_flow(&seq)?;
    tracing::info!(
        "Linked {} frame pairs, {} flow records",
        result.pairs.len(),
        result.table.len()
    );

    result.table.write_json_file(&args.out)?;
    tracing::info!("Flow table written to {}", args.out.display());

    if let Some(path) = &args.links_out {
        let json = serde_json::to_string_pretty(&result.pairs)?;
        std::fs::write(path, &json)?;
        tracing::info!("Link details written to {}", path.display());
    }
    Ok(())
}

// ── track ──────────────────────────────────────────────────────────────

fn run_track(args: &CliTrackArgs) -> CliResult<()> {
    let config = args.tuning.build_config()?;
    let seq = args.tuning.load_sequence(&args.sequence)?;
    let tracker = Tracker::with_config(config);

    let table = match &args.flow {
        Some(path) => {
            tracing::info!("Loading flow table: {}", path.display());
            SparseFlowTable::from_json_file(path)?
        }
        None => {
            let flow = tracker.build_flow(&seq)?;
            if let Some(out) = &args.flow_out {
                flow.table.write_json_file(out)?;
                tracing::info!("Flow table written to {}", out.display());
            }
            flow.table
        }
    };

    let labels = tracker.propagate_labels(&seq, &table)?;
    let n_unmatched: usize = labels.steps.iter().map(|s| s.stats.n_unmatched).sum();
    let n_fresh: usize = labels.steps.iter().map(|s| s.n_fresh_labels).sum();
    tracing::info!(
        "Propagated labels over {} steps ({} unmatched voxels, {} fresh labels)",
        labels.steps.len(),
        n_unmatched,
        n_fresh
    );

    io::save_labels(&labels, &args.out)?;
    tracing::info!("Labels written to {}", args.out.display());
    Ok(())
}

// ── interpolate ────────────────────────────────────────────────────────

fn run_interpolate(args: &CliInterpolateArgs) -> CliResult<()> {
    let table = SparseFlowTable::from_json_file(&args.flow)?;
    let mut config = voxflow::InterpolationConfig::default();
    if let Some(r) = args.interp_radius {
        config.max_radius_um = r;
    }
    config.validate()?;

    let mut interp = FlowInterpolator::new(&table, args.direction.to_core(), config);
    for p in &args.points {
        match interp.interpolate(*p, args.frame) {
            Some(d) => println!(
                "[{:.3}, {:.3}, {:.3}] -> [{:.4}, {:.4}, {:.4}]",
                p[0], p[1], p[2], d[0], d[1], d[2]
            ),
            None => println!("[{:.3}, {:.3}, {:.3}] -> none", p[0], p[1], p[2]),
        }
    }
    Ok(())
}

// ── flow-info ──────────────────────────────────────────────────────────

fn run_flow_info(path: &Path) -> CliResult<()> {
    let table = SparseFlowTable::from_json_file(path)?;
    let s = table.scaling();

    println!("voxflow flow table");
    println!("  schema:   {}", voxflow::FLOW_SCHEMA_V1);
    println!("  records:  {}", table.len());
    println!("  scaling:  z={} y={} x={} um", s.z, s.y, s.x);
    for t in table.frames() {
        let n = table.records_for_frame(t).len();
        let speed = table.mean_speed_um(t).unwrap_or(0.0);
        println!("  frame {:>4} -> {:>4}: {:>6} records, mean |d| = {:.3} um", t, t + 1, n, speed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_parser_accepts_three_coordinates() {
        assert_eq!(parse_point("1, 2.5,3").unwrap(), [1.0, 2.5, 3.0]);
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("a,b,c").is_err());
    }

    #[test]
    fn tuning_overrides_apply() {
        let args = CliTuningArgs {
            max_speed: Some(4.0),
            max_iters: Some(3),
            unmatched_policy: Some(UnmatchedPolicyArg::FreshLabel),
            propagation: Some(PropagationArg::Backward),
            serial: true,
            ..Default::default()
        };
        let cfg = args.build_config().unwrap();
        assert_eq!(cfg.max_link_speed_um_per_s, 4.0);
        assert_eq!(cfg.reassign.max_iterations, 3);
        assert_eq!(cfg.reassign.unmatched_policy, UnmatchedPolicy::FreshLabelPerInstance);
        assert_eq!(cfg.propagation, Propagation::Backward);
        assert_eq!(cfg.backend, BackendKind::Serial);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let args = CliTuningArgs {
            max_iters: Some(0),
            ..Default::default()
        };
        assert!(args.build_config().is_err());
    }
}
