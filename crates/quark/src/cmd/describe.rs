use crate::cmd::{open_session, runtime, DescribeArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_methods, MethodRow, OutputFormat};

pub fn run(args: DescribeArgs, format: OutputFormat) -> CliResult<i32> {
    let rt = runtime()?;
    rt.block_on(async {
        let session = open_session(&args.connect).await?;
        let rows: Vec<MethodRow> = session
            .api()
            .methods()
            .iter()
            .map(|stub| MethodRow::from_stub(stub))
            .collect();
        let security = session.security_state().to_string();
        session.stop();

        print_methods(session.id(), &security, &rows, format);
        Ok(SUCCESS)
    })
}
