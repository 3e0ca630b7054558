//! Human mode prints the data as-is (strings) or as pretty JSON.
//! JSON mode wraps it in `{ data }`.

use anyhow::Result;
use serde_json::{Value, json};

use crate::opts::OutputOpts;

pub fn print_success(opts: &OutputOpts, data: Value) -> Result<()> {
    if opts.pretty {
        println!("{}", serde_json::to_string_pretty(&json!({ "data": data }))?);
    } else if opts.json {
        println!("{}", serde_json::to_string(&json!({ "data": data }))?);
    } else {
        match data {
            Value::String(s) => println!("{s}"),
            other => println!("{}", serde_json::to_string_pretty(&other)?),
        }
    }
    Ok(())
}
