use crate::cmd::{parse_msgid, LinkArgs, RequestArgs};
use crate::exit::{vehicle_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: RequestArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let mut vehicle = link.open()?;
    let msgid = parse_msgid(&args.msgid, vehicle.connection().dialect())?;

    let msg = vehicle
        .request_message(msgid)
        .map_err(|err| vehicle_error("request", err))?;
    print_message(&msg, vehicle.connection().dialect(), format);
    Ok(SUCCESS)
}
