use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use crate::geometry::Point;
use crate::ray::RayInteraction;
use crate::scene::{Scene, SceneDocument};
use crate::scene_object::SceneObject;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand one module definition and print the resulting object records
    Expand {
        /// Module definition (JSON)
        #[arg(long)]
        module: PathBuf,

        /// Module name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,

        /// Control point as X,Y; repeat once per point
        #[arg(long = "point", value_parser = parse_point)]
        points: Vec<Point>,

        /// Parameter value as NAME=VALUE; repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, f64)>,

        /// Seed for random()
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Snap control points to this grid size
        #[arg(long)]
        grid: Option<f64>,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// Load a scene and report expansion errors and warnings
    Check {
        /// Scene document (JSON)
        #[arg(long)]
        scene: PathBuf,

        /// Override the scene's random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Print structured diagnostics as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Replace a module instance in a scene with its expanded objects
    Demodulize {
        /// Scene document (JSON)
        #[arg(long)]
        scene: PathBuf,

        /// Index of the module instance among the scene's objects
        #[arg(long)]
        index: usize,

        /// Where to write the result (defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got `{}`", s))?;
    let coord = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("`{}`: {}", v, e));
    Ok(Point::new(coord(x)?, coord(y)?))
}

fn parse_param(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{}`", s))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("`{}`: {}", value, e))?;
    Ok((name.trim().to_string(), value))
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Expand {
            module,
            name,
            points,
            params,
            seed,
            grid,
            pretty,
        } => {
            let records = expand_module(&module, name, points, params, seed, grid)?;
            print_json(&Value::Array(records), pretty)?;
        }
        Commands::Check { scene, seed, json } => check_scene(&scene, seed, json)?,
        Commands::Demodulize { scene, index, out } => demodulize_scene(&scene, index, out.as_deref())?,
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

fn expand_module(
    path: &Path,
    name: Option<String>,
    points: Vec<Point>,
    params: Vec<(String, f64)>,
    seed: u64,
    grid: Option<f64>,
) -> Result<Vec<Value>> {
    let name = match name {
        Some(name) => name,
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("cannot derive a module name from {}", path.display()))?,
    };
    let definition = read_json(path)?;

    let mut scene = Scene::with_seed(seed);
    scene.set_grid_size(grid);
    scene.define_module(&name, &definition)?;

    let index = scene.begin_module_placement(&name)?;
    for point in points {
        scene.place_point(index, point.into())?;
    }
    for (param, value) in &params {
        scene.set_module_param(index, param, *value)?;
    }
    // Final expansion draws from a fresh stream.
    scene.refresh();

    let instance = scene
        .get(index)
        .and_then(SceneObject::as_module)
        .ok_or_else(|| anyhow!("module instance went missing"))?;
    if !instance.is_complete() {
        bail!(
            "module `{}` needs {} control points, got {}",
            name,
            instance.definition().num_points,
            instance.points().len()
        );
    }
    if let Some(err) = instance.error() {
        bail!("expansion of `{}` failed:\n{}", name, err);
    }
    log::info!("expanded `{}` into {} objects", name, instance.objects().len());
    Ok(instance.objects().iter().map(SceneObject::to_record).collect())
}

fn load_scene(path: &Path) -> Result<Scene> {
    let doc: SceneDocument =
        serde_json::from_value(read_json(path)?).with_context(|| format!("reading scene {}", path.display()))?;
    Ok(Scene::from_document(&doc)?)
}

fn check_scene(path: &Path, seed: Option<u64>, as_json: bool) -> Result<()> {
    let mut scene = load_scene(path)?;
    if let Some(seed) = seed {
        scene.reseed(seed);
    }

    let errors = scene.error_report();
    if as_json {
        let diagnostics: Vec<Value> = scene
            .diagnostics()
            .into_iter()
            .map(|(index, diagnostic)| json!({"index": index, "diagnostic": diagnostic}))
            .collect();
        print_json(
            &json!({
                "errors": errors,
                "warnings": scene.warning_report(),
                "diagnostics": diagnostics,
            }),
            true,
        )?;
    } else {
        if let Some(warnings) = scene.warning_report() {
            println!("warnings:\n{}", warnings);
        }
        match &errors {
            Some(errors) => println!("errors:\n{}", errors),
            None => println!("{}: {} objects, no errors", path.display(), scene.len()),
        }
    }

    if errors.is_some() {
        bail!("{} has expansion errors", path.display());
    }
    Ok(())
}

fn demodulize_scene(path: &Path, index: usize, out: Option<&Path>) -> Result<()> {
    let mut scene = load_scene(path)?;
    let count = scene.demodulize(index)?;
    log::info!("object #{} replaced by {} objects", index, count);

    let doc = serde_json::to_value(scene.to_document())?;
    match out {
        Some(out) => {
            let text = serde_json::to_string_pretty(&doc)?;
            fs::write(out, text).with_context(|| format!("writing {}", out.display()))
        }
        None => print_json(&doc, true),
    }
}
