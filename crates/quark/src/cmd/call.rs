use serde_json::Value;
use tracing::info;

use crate::cmd::{open_session, runtime, CallArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_result, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let call_args = parse_args(&args.args);
    let rt = runtime()?;
    rt.block_on(async {
        let session = open_session(&args.connect).await?;
        info!(path = %args.path, argc = call_args.len(), "calling");
        let outcome = session.api().call(&args.path, call_args).await;
        session.stop();

        let result = outcome.map_err(|e| session_error("call failed", e))?;
        print_result(&args.path, &result, format);
        Ok(SUCCESS)
    })
}

fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|text| {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn arguments_are_json_or_text() {
        let raw = vec![
            "John Doe".to_string(),
            "42".to_string(),
            r#"{"a":1}"#.to_string(),
            r#""quoted""#.to_string(),
        ];
        assert_eq!(
            parse_args(&raw),
            vec![json!("John Doe"), json!(42), json!({"a": 1}), json!("quoted")]
        );
    }
}
