use neb_core::{
    domain::{Content, ServiceRecord},
    matcher::{Command, CommandContext},
    service::{Service, ServiceBase},
    Result,
};

pub const SERVICE_TYPE: &str = "echo";

/// Repeats its arguments back into the room as a notice, so the reply is
/// never parsed as a command again.
pub struct EchoService {
    base: ServiceBase,
}

pub fn build(record: &ServiceRecord) -> Result<Box<dyn Service>> {
    Ok(Box::new(EchoService {
        base: ServiceBase::from_record(record),
    }))
}

impl Service for EchoService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn commands(&self) -> Vec<Command> {
        vec![Command::new(["echo"], |ctx: CommandContext| async move {
            if ctx.args.is_empty() {
                anyhow::bail!("usage: !echo <text>");
            }
            Ok(Some(Content::notice(ctx.args.join(" "))))
        })
        .with_help("Repeat the given text.")]
    }
}
