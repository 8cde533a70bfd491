use anyhow::Result;
use provision::Dag;

use super::Stack;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let stack = Stack::locate(ctx)?;
    let summary = check(&stack)?;
    if !ctx.quiet {
        ui::success(&format!(
            "{} is valid: {}, {}, {}",
            stack.document_path.display(),
            ui::plural(summary.resources, "resource"),
            ui::plural(summary.edges, "dependency"),
            ui::plural(summary.outputs, "output"),
        ));
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct Summary {
    resources: usize,
    edges: usize,
    outputs: usize,
}

/// Build everything a run would build before touching providers
fn check(stack: &Stack) -> Result<Summary> {
    let (doc, model) = stack.model()?;
    let graph = Dag::from_model(&model)?;
    stack.providers().check_model(&model)?;
    Ok(Summary {
        resources: model.len(),
        edges: graph.edge_count(),
        outputs: doc.outputs.len(),
    })
}
