use anyhow::{Result, bail};
use provision::document::render_output;
use std::collections::BTreeMap;

use super::Stack;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, name: Option<&str>, json: bool) -> Result<()> {
    let stack = Stack::locate(ctx)?;
    let doc = stack.document()?;
    let snapshot = stack.store.load()?;
    let outputs = select(doc.outputs(&snapshot)?, name)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
        return Ok(());
    }

    // A single named output prints bare so it can be used in scripts
    if let Some(name) = name {
        match outputs.get(name).and_then(Option::as_ref) {
            Some(value) => println!("{}", render_output(value)),
            None => bail!("output {name} is not known until its resources are applied"),
        }
        return Ok(());
    }

    for (key, value) in &outputs {
        match value {
            Some(value) => ui::kv(key, &render_output(value)),
            None => ui::kv(key, "(not yet known)"),
        }
    }
    Ok(())
}

fn select<V>(mut outputs: BTreeMap<String, V>, name: Option<&str>) -> Result<BTreeMap<String, V>> {
    let Some(name) = name else {
        return Ok(outputs);
    };
    match outputs.remove_entry(name) {
        Some((key, value)) => Ok(BTreeMap::from([(key, value)])),
        None => {
            let known: Vec<&str> = outputs.keys().map(String::as_str).collect();
            bail!("no output named {name} (known: {})", known.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_single_output() {
        let outputs = BTreeMap::from([("VpcId".to_string(), 1), ("SubnetIds".to_string(), 2)]);
        assert_eq!(select(outputs.clone(), None).unwrap().len(), 2);

        let one = select(outputs.clone(), Some("VpcId")).unwrap();
        assert_eq!(one, BTreeMap::from([("VpcId".to_string(), 1)]));

        let err = select(outputs, Some("Nope")).unwrap_err();
        assert!(err.to_string().contains("SubnetIds, VpcId"));
    }
}
