use argh::FromArgs;
use std::process;

use chartbird::builtin_grammars::{demo_blurb, toy_translation, DEMO_SENTENCE};
use chartbird::chart;
use chartbird::config::DecoderConfig;
use chartbird::lattice::Lattice;

#[derive(FromArgs)]
/// Decode one sentence with the builtin toy grammar
#[argh(subcommand, name = "decode")]
pub struct Decode {
    /// sentence to decode (default: the builtin demo sentence)
    #[argh(option, short = 's')]
    sentence: Option<String>,

    /// combine exhaustively instead of cube pruning
    #[argh(switch)]
    exhaustive: bool,

    /// beam offset over the best cost per cell
    #[argh(option, short = 'b', default = "10.0")]
    beam: f64,

    /// print the grammar blurb and exit
    #[argh(switch)]
    describe: bool,
}

impl Decode {
    pub fn run(self) {
        if self.describe {
            println!("{}", demo_blurb());
            return;
        }
        let mut setup = toy_translation();
        let sentence = self.sentence.as_deref().unwrap_or(DEMO_SENTENCE);
        let words: Vec<_> = sentence
            .split_whitespace()
            .map(|w| setup.symbols.add_terminal(w))
            .collect();
        let lattice = Lattice::linear(&words);

        let config = DecoderConfig {
            use_cube_prune: !self.exhaustive,
            beam_width: Some(self.beam),
            ..DecoderConfig::default()
        };

        match chart::parse(
            &lattice,
            &setup.models,
            &setup.grammars,
            setup.goal,
            &[],
            &config,
            &mut setup.symbols,
            0,
            false,
        ) {
            Ok(hg) => {
                println!("input:      {sentence}");
                println!("best:       {}", hg.best_target(&setup.symbols));
                println!("cost:       {:.4}", hg.best_cost());
                println!("derivation: {}", hg.render_derivation(&setup.symbols));
                println!("stats:      {}", hg.stats);
            }
            Err(e) => {
                eprintln!("decode failed: {e}");
                process::exit(1);
            }
        }
    }
}
