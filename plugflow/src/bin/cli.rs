use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use plugflow::nodes::{MultiplyNode, SceneDescription, SceneSource};
use plugflow::rendering::{CapturingRenderer, ProgressCallback, RenderController};
use plugflow::scene::PathMatcher;
use plugflow::{Context, Document, EngineConfig, Graph, TaskStatus};

#[derive(Parser)]
#[command(name = "plugflow-cli")]
#[command(about = "Evaluates a small graph, then renders a JSON scene description", long_about = None)]
struct Args {
    /// Scene description to load and render.
    scene: Option<PathBuf>,

    /// Engine configuration as JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the value cache memory limit, in megabytes.
    #[arg(long)]
    cache_mb: Option<usize>,
}

fn multiply_demo() -> Result<(), Box<dyn Error>> {
    let mut graph = Graph::new();
    let id = graph.add_node("multiply", MultiplyNode::build);
    let (op1, op2, product) = {
        let node = graph.node_as::<MultiplyNode>(id).ok_or("missing multiply node")?;
        (node.op1, node.op2, node.product)
    };

    let context = Context::new();
    graph.set_value(op1, 3i64)?;
    graph.set_value(op2, 3i64)?;
    println!("{} = {}", graph.full_name(product), graph.get_value(product, &context)?.as_int().unwrap_or_default());
    graph.set_value(op2, 4i64)?;
    println!("{} = {}", graph.full_name(product), graph.get_value(product, &context)?.as_int().unwrap_or_default());

    let cache = graph.value_cache();
    println!(
        "Value cache : {} entries, {} of {} bytes",
        cache.len(),
        cache.current_cost(),
        cache.max_cost()
    );
    Ok(())
}

fn render_scene(path: &Path) -> Result<(), Box<dyn Error>> {
    let json_str = fs::read_to_string(path)?;
    let description = SceneDescription::from_json(&json_str)?;

    let mut graph = Graph::new();
    let id = graph.add_node("scene", SceneSource::build);
    let source = *graph.node_as::<SceneSource>(id).ok_or("missing scene node")?;
    source.load(&mut graph, &description)?;

    let document = Arc::new(Document::new(graph));
    let renderer = CapturingRenderer::new();
    let controller = RenderController::new(
        document,
        source.out,
        Arc::new(renderer.clone()),
        Context::new(),
    );
    controller.set_minimum_expansion_depth(usize::MAX);

    let callback: ProgressCallback = Arc::new(|status: TaskStatus| {
        if status != TaskStatus::Running {
            log::info!("Update {}", status);
        }
    });
    if let Some(task) = controller.update_in_background(Some(callback), PathMatcher::new()) {
        task.wait();
        println!("Update finished : {}", task.status());
    }

    for name in renderer.captured_names() {
        if let Some(object) = renderer.captured_object(&name) {
            let [x, y, z] = object.transform().translation_part();
            println!(
                "{} ({}) at [{}, {}, {}] id {}",
                name,
                object.object().type_name,
                x,
                y,
                z,
                object.id()
            );
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    config = config.with_env_overrides(|name| env::var(name).ok())?;
    if let Some(cache_mb) = args.cache_mb {
        config.value_cache_memory_limit = cache_mb * 1024 * 1024;
    }
    config.apply();

    multiply_demo()?;
    match &args.scene {
        Some(path) => render_scene(path),
        None => Ok(()),
    }
}
