use argh::FromArgs;
mod cmd_decode;

#[derive(FromArgs)]
/// A toy SCFG chart decoder
struct Args {
    #[argh(subcommand)]
    subcommand: Subcommand,
}

#[derive(FromArgs)]
/// decode something
#[argh(subcommand)]
enum Subcommand {
    Decode(cmd_decode::Decode),
}

impl Subcommand {
    fn run(self) {
        match self {
            Subcommand::Decode(cmd) => cmd.run(),
        }
    }
}

fn main() {
    env_logger::init();
    argh::from_env::<Args>().subcommand.run();
}
