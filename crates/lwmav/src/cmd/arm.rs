use serde::Serialize;

use crate::cmd::{ArmArgs, LinkArgs};
use crate::exit::{vehicle_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct ArmOutput {
    command: &'static str,
    force: bool,
    acknowledged: bool,
}

pub fn run(arm: bool, args: ArmArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let mut vehicle = link.open()?;
    let command = if arm { "arm" } else { "disarm" };

    let result = if args.no_wait {
        vehicle.arm_disarm_async(arm, args.force)
    } else {
        vehicle.arm_disarm(arm, args.force)
    };
    result.map_err(|err| vehicle_error(command, err))?;

    let out = ArmOutput {
        command,
        force: args.force,
        acknowledged: !args.no_wait,
    };
    print_record("Arming", &out, format);
    Ok(SUCCESS)
}
