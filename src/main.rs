extern crate clap;

use clap::{App, Arg};
use crossfill::{render_grid, Filler, Grid, WordList};

fn main() -> Result<(), String> {
    env_logger::init();

    let matches = App::new("crossfill")
        .arg(
            Arg::with_name("structure")
                .value_name("STRUCTURE")
                .help("Grid template location")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("words")
                .value_name("WORDS")
                .help("Word list location")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::with_name("output")
                .value_name("OUTPUT")
                .help("Optional location to write the rendered fill")
                .index(3),
        )
        .get_matches();

    let structure = matches.value_of("structure").expect("structure not included");
    let words_path = matches.value_of("words").expect("words not included");

    let grid = Grid::load(structure).map_err(|err| err.to_string())?;
    let words = WordList::load(words_path).map_err(|err| err.to_string())?;

    let mut filler = Filler::new(&grid, &words);

    match filler.solve() {
        Some(assignment) => {
            let rendered = render_grid(&grid, &words, &assignment);
            println!("{}", rendered);

            if let Some(output) = matches.value_of("output") {
                std::fs::write(output, &rendered).map_err(|err| err.to_string())?;
            }
        }
        None => println!("No solution."),
    }

    Ok(())
}
