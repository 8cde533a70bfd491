use anyhow::Result;
use colored::Colorize;
use provision::Dag;

use super::Stack;
use crate::Context;
use crate::ui;

/// Print resources in dependency order, one per line
pub fn run(ctx: &Context) -> Result<()> {
    let stack = Stack::locate(ctx)?;
    let (_, model) = stack.model()?;
    let graph = Dag::from_model(&model)?;

    ui::header(&format!("Stack {}", stack.name));
    for line in render(&model, &graph) {
        println!("{line}");
    }
    Ok(())
}

fn render(model: &provision::Model, graph: &Dag) -> Vec<String> {
    graph
        .topological_order()
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            let kind = model.get(id).map_or("?", |r| r.kind.as_str());
            let deps = graph.dependencies(id);
            let arrow = if deps.is_empty() {
                String::new()
            } else {
                format!(" <- {}", deps.join(", ")).dimmed().to_string()
            };
            format!("{:>3}. {} {}{}", i + 1, id.bold(), format!("({kind})").dimmed(), arrow)
        })
        .collect()
}
