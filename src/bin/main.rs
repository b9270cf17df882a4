use std::env;
use std::fmt::Display;
#[cfg(feature = "pretty")]
use std::io::Write;
use std::io::{stdin, BufRead, Read};
use std::path::Path;
use std::process::exit;
use std::str::FromStr;
use std::time::Instant;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
#[cfg(feature = "pretty")]
use colored::Colorize;

use effort_curve::cluster::{AnalysisReport, AnalysisRequest, PredictionTarget};
use effort_curve::{
    ClusteringConfig, Point, PowerFitModel, PredictionTierStat, PredictionUnit, Predictive,
};

fn parse<T: FromStr>(s: &str) -> Option<T> {
    if let Ok(v) = s.parse() {
        Some(v)
    } else {
        eprintln!("Failed to parse value {s:?}");
        None
    }
}

/// Reads lines of `x y` (or `x, y`) until an empty line. [`None`] on end of input.
fn input_points(is_tty: bool, debug_performance: bool) -> Option<Vec<Point>> {
    #[cfg(feature = "pretty")]
    {
        if is_tty {
            print!("multiline > ");
            std::io::stdout().lock().flush().ok();
        }
    }
    #[cfg(not(feature = "pretty"))]
    let _ = is_tty;

    let mut now = Instant::now();
    let mut values = Vec::with_capacity(8);
    let mut lines = 0_usize;
    for line in stdin().lock().lines() {
        if lines == 0 {
            now = Instant::now();
        }
        lines += 1;
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            break;
        }
        let current: Vec<f64> = line
            .split(',')
            .flat_map(|s| s.split_whitespace())
            .filter_map(|segment| parse(segment.trim()))
            .collect();
        if let &[x, y] = current.as_slice() {
            values.push(Point::new(x, y));
        } else {
            eprintln!("Expected 2 values per line, got {}.", current.len());
        }
    }
    if lines <= 1 && values.is_empty() {
        return None;
    }

    if debug_performance {
        println!("Parsing/reading input took {}µs", now.elapsed().as_micros());
    }
    Some(values)
}

fn load_config(matches: &ArgMatches) -> ClusteringConfig {
    let Some(path) = matches.get_one::<String>("config") else {
        return ClusteringConfig::default();
    };
    match ClusteringConfig::load(Path::new(path)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config {path:?}: {err}");
            exit(1);
        }
    }
}

fn print_fit(model: &PowerFitModel, points: &[Point], precision: Option<usize>) {
    let len = points.len();
    let x = points.iter().map(|p| p.x);
    let y = points.iter().map(|p| p.y);
    let determination = model.determination(x, y, len);
    let last = points[len - 1];
    let next_gain = (model.fitted_y(last.x + 1.0) - last.y).max(0.0);
    let p = precision.unwrap_or(4);
    println!(
        "Determination: {determination:.p$}, RMSE: {:.p$}, Predicted equation: {model:.p$}",
        model.rmse(),
    );
    println!(
        "Exponent: {:.p$}, slope at last point: {:.p$}, predicted gain of next unit: {next_gain:.p$}",
        model.exponent(),
        model.first_derivative(last.x),
    );
}

fn plot(model: &PowerFitModel, points: &[Point], config: &ArgMatches, debug_performance: bool) {
    let now = Instant::now();

    let samples = config.get_one::<usize>("plot_samples").copied().unwrap_or(500);
    let title = config
        .get_one::<String>("plot_title")
        .map_or("Accumulation curve", String::as_str);
    let x_name = config
        .get_one::<String>("plot_x_axis")
        .map_or("effort", String::as_str);
    let y_name = config
        .get_one::<String>("plot_y_axis")
        .map_or("count", String::as_str);

    let curve: Vec<(f64, f64)> = model
        .model_points(samples)
        .into_iter()
        .map(|p| (p.x, p.y))
        .collect();
    let raw: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();

    let plots = poloto::plots!(
        poloto::build::plot(format!("{model:.2}")).line(curve),
        poloto::build::plot("observed").scatter(raw)
    );
    let data = match poloto::frame_build()
        .data(plots)
        .build_and_label((title, x_name, y_name))
        .append_to(poloto::header().light_theme())
        .render_string()
    {
        Ok(data) => data,
        Err(err) => {
            eprintln!("Failed to render plot: {err}");
            return;
        }
    };

    let path = if let Some(path) = config.get_one::<String>("plot_filename") {
        let mut path = Path::new(path).to_path_buf();
        path.set_extension("svg");
        path
    } else {
        "plot.svg".into()
    };
    if let Err(err) = std::fs::write(&path, data) {
        eprintln!("Failed to write plot file {}: {err}", path.display());
        return;
    }

    println!("Wrote plot file.");
    if debug_performance {
        println!("Plotting took {}µs.", now.elapsed().as_micros());
    }
}

fn heading(s: impl Display) -> String {
    #[cfg(feature = "pretty")]
    {
        s.to_string().bold().to_string()
    }
    #[cfg(not(feature = "pretty"))]
    {
        s.to_string()
    }
}

fn percent(fraction: f64, precision: usize) -> String {
    let s = format!("{:.precision$}%", fraction * 100.0);
    #[cfg(feature = "pretty")]
    {
        if fraction >= 0.5 {
            s.green().to_string()
        } else {
            s.yellow().to_string()
        }
    }
    #[cfg(not(feature = "pretty"))]
    {
        s
    }
}

fn print_tiers(name: &str, stats: &[PredictionTierStat], precision: usize) {
    if stats.is_empty() {
        println!("  {name}: not enough history");
        return;
    }
    let tiers: Vec<String> = stats
        .iter()
        .map(|s| {
            format!(
                "top {}: {}",
                s.contributing_locations,
                percent(s.fraction_correct, precision)
            )
        })
        .collect();
    println!("  {name}: {}", tiers.join(", "));
}

fn print_report(report: &AnalysisReport, precision: usize) {
    for cluster in &report.clusters {
        println!(
            "{}",
            heading(format!(
                "Cluster {:?} ({} locations, {} taxa)",
                cluster.key,
                cluster.locations.len(),
                cluster.taxa.len()
            ))
        );
        print_tiers("per visit", &cluster.per_visit_stats, precision);
        print_tiers("per person-visit", &cluster.per_person_visit_stats, precision);
        print_tiers("taxa", &cluster.taxon_stats, precision);
        println!("  next visit ranking:");
        for location in &cluster.locations {
            let show = |unit| {
                location
                    .predicted_diff(unit)
                    .map_or_else(|| "-".to_owned(), |d| format!("{d:.precision$}"))
            };
            println!(
                "    {}: +{} per visit, +{} per person-visit",
                location.key,
                show(PredictionUnit::PerVisit),
                show(PredictionUnit::PerPersonVisit),
            );
        }
        for curve in &cluster.pooled_curves {
            println!(
                "  pooled {:?} curve: {:.p$} * x^{:.p$} + {:.p$} (RMSE {:.p$})",
                curve.unit,
                curve.scale,
                curve.exponent,
                curve.offset,
                curve.rmse,
                p = precision,
            );
        }
    }
    let summary = &report.summary;
    println!(
        "{}",
        heading(format!(
            "Summary over {} clusters, {} locations, {} taxa",
            summary.cluster_count, summary.location_count, summary.taxon_count
        ))
    );
    for headline in &summary.headlines {
        let show = |target| {
            headline
                .percent(target)
                .map_or_else(|| "-".to_owned(), |p| percent(p / 100.0, precision))
        };
        let parts: Vec<String> = PredictionTarget::ALL
            .iter()
            .map(|&target| format!("{target:?}: {}", show(target)))
            .collect();
        println!(
            "  top {}..{}: {}",
            headline.range.min_tier,
            headline.range.max_tier,
            parts.join(", ")
        );
    }
}

fn rank(config_matches: &ArgMatches, precision: Option<usize>, debug_performance: bool) {
    let config = load_config(config_matches);

    let now = Instant::now();
    let read = match config_matches.get_one::<String>("input") {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut s = String::new();
            stdin().lock().read_to_string(&mut s).map(|_| s)
        }
    };
    let input = match read {
        Ok(input) => input,
        Err(err) => {
            eprintln!("Failed to read input: {err}");
            exit(1);
        }
    };
    let request = match AnalysisRequest::from_json(&input) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("Rejected input: {err}");
            exit(1);
        }
    };
    if debug_performance {
        println!("Parsing/reading input took {}µs", now.elapsed().as_micros());
    }

    let now = Instant::now();
    let report = effort_curve::analyze(request, &config);
    if debug_performance {
        println!("Analysis took {}µs.", now.elapsed().as_micros());
    }

    if config_matches.get_flag("json") {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("Failed to serialize report: {err}");
                exit(1);
            }
        }
    } else {
        print_report(&report, precision.unwrap_or(1));
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

fn command() -> Command {
    let config_arg = Arg::new("config")
        .short('c')
        .long("config")
        .help("TOML file with analysis settings. Missing settings take their defaults.");

    let app = clap::command!()
        .subcommand_required(true)
        .arg(
            Arg::new("debug-performance")
                .short('p')
                .long("debug-performance")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("precision")
                .short('n')
                .long("precision")
                .help("Sets the precision of the output. When this isn't set, a sensible default for each value is used.")
                .value_parser(value_parser!(usize))
                .global(true),
        )
        .subcommand(
            Command::new("fit")
                .about("Fit the curve `A * x^P + B` to an accumulation series. \
                Enter one `effort count` pair per line; an empty line ends the series.")
                .arg(config_arg.clone())
                .arg(Arg::new("plot")
                    .long("plot")
                    .action(ArgAction::SetTrue)
                    .help("Plots the fitted curve and input points in a SVG.")
                )
                .arg(Arg::new("plot_filename")
                    .long("plot-out")
                    .help("File name (without extension) for SVG plot.")
                    .requires("plot")
                )
                .arg(Arg::new("plot_samples")
                    .long("plot-samples")
                    .help("Count of sample points when drawing the curve.")
                    .value_parser(value_parser!(usize))
                    .requires("plot")
                )
                .arg(Arg::new("plot_title")
                    .long("plot-title")
                    .help("Title of plot.")
                    .requires("plot")
                )
                .arg(Arg::new("plot_x_axis")
                    .long("plot-axis-x")
                    .help("Name of x axis of plot (the first column of data).")
                    .requires("plot")
                )
                .arg(Arg::new("plot_y_axis")
                    .long("plot-axis-y")
                    .help("Name of y axis of plot (the second column of data).")
                    .requires("plot")
                ),
        )
        .subcommand(
            Command::new("rank")
                .about("Backtest and rank the locations and taxa of clusters. \
                Reads a JSON request with `clusters`, each holding `locations` with point series and optional `visit_histories`.")
                .arg(config_arg)
                .arg(Arg::new("input")
                    .short('i')
                    .long("input")
                    .help("JSON file to read instead of stdin.")
                )
                .arg(Arg::new("json")
                    .long("json")
                    .action(ArgAction::SetTrue)
                    .help("Print the full report as JSON.")
                ),
        );

    #[cfg(feature = "completion")]
    let app = clap_autocomplete::add_subcommand(app);

    app
}

fn main() {
    let app = command();
    #[cfg(feature = "completion")]
    let command_copy = app.clone();
    let matches = app.get_matches();

    #[cfg(feature = "completion")]
    match clap_autocomplete::test_subcommand(&matches, command_copy) {
        Some(Ok(())) => exit(0),
        Some(Err(err)) => {
            eprintln!("Insufficient permissions: {err}");
            exit(1);
        }
        None => {}
    }

    init_logging();

    let debug_performance = env::var("DEBUG_PERFORMANCE").ok().map_or_else(
        || matches.get_flag("debug-performance"),
        |s| !s.trim().is_empty(),
    );
    let precision = matches.get_one::<usize>("precision").copied();

    #[cfg(feature = "pretty")]
    let tty = atty::is(atty::Stream::Stdin);
    #[cfg(not(feature = "pretty"))]
    let tty = false;

    match matches.subcommand() {
        Some(("fit", config)) => {
            let options = load_config(config).power_fit;
            loop {
                let Some(points) = input_points(tty, debug_performance) else {
                    exit(0);
                };
                if points.is_empty() {
                    eprintln!("Only invalid input. Try again.");
                    continue;
                }

                let now = Instant::now();
                let model = match PowerFitModel::fit_with(&points, &options) {
                    Ok(model) => model,
                    Err(err) => {
                        eprintln!("{err}");
                        continue;
                    }
                };
                print_fit(&model, &points, precision);
                if debug_performance {
                    println!("Regression analysis took {}µs.", now.elapsed().as_micros());
                }

                if config.get_flag("plot") {
                    plot(&model, &points, config, debug_performance);
                }
            }
        }
        Some(("rank", config)) => rank(config, precision, debug_performance),
        _ => unreachable!("invalid subcommand"),
    }
}
