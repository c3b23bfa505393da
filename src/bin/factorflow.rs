//! CLI front-end: reads a CSV dataset and one or more `name=expression`
//! factors from the command line, replays them, and prints the resulting
//! table as CSV on stdout.
//!
//! This binary is ambient plumbing around the library, not part of the
//! engine itself; the library never knows what a CSV file is (`DatasetSource`
//! exists precisely so it doesn't have to).

use annotate_snippets::display_list::{DisplayList, FormatOptions};
use annotate_snippets::snippet::{Annotation, AnnotationType, Slice, Snippet, SourceAnnotation};
use clap::{App, Arg};
use log::{info, warn};

use factorflow::{Column, DatasetSource, Factor, InMemoryDataset, ParseError, ReplayOptions};

fn main() {
    let matches = App::new("factorflow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Replays factor expressions against a CSV dataset")
        .arg(Arg::with_name("input").long("input").short("i").takes_value(true).required(true).help("Path to the input CSV file"))
        .arg(
            Arg::with_name("factor")
                .long("factor")
                .short("f")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .required(true)
                .help("A factor as name=expression, e.g. -f sum=\"(TSSum 3 :x)\""),
        )
        .arg(Arg::with_name("predicate").long("predicate").short("p").takes_value(true).help("An optional boolean factor used to filter output rows"))
        .arg(Arg::with_name("index-col").long("index-col").takes_value(true).help("A column to echo through to the output unchanged"))
        .arg(Arg::with_name("trim").long("trim").help("Drop leading rows until every factor is warmed up"))
        .arg(Arg::with_name("jobs").long("jobs").short("j").takes_value(true).default_value("1").help("Worker threads for factor-parallel evaluation"))
        .arg(Arg::with_name("batch-size").long("batch-size").takes_value(true).default_value("40960"))
        .arg(Arg::with_name("verbose").long("verbose").short("v").help("Enable debug logging"))
        .get_matches();

    let verbose = matches.is_present("verbose");
    if verbose {
        simple_logger::init_with_level(log::Level::Debug).expect("logger installs exactly once");
    } else {
        simple_logger::init_with_level(log::Level::Warn).expect("logger installs exactly once");
    }

    let input_path = matches.value_of("input").unwrap();
    let dataset = match read_csv_dataset(input_path) {
        Ok(ds) => ds,
        Err(e) => {
            eprintln!("error: could not read {input_path:?}: {e}");
            std::process::exit(1);
        }
    };

    let mut factors = Vec::new();
    for spec in matches.values_of("factor").unwrap() {
        let (name, source) = match spec.split_once('=') {
            Some(pair) => pair,
            None => {
                eprintln!("error: factor {spec:?} is not of the form name=expression");
                std::process::exit(1);
            }
        };
        match Factor::parse(source) {
            Ok(f) => factors.push((name.to_string(), f)),
            Err(err) => {
                print_parse_error(source, &err);
                std::process::exit(1);
            }
        }
    }

    let predicate = match matches.value_of("predicate") {
        Some(source) => match Factor::parse(source) {
            Ok(f) => Some(f),
            Err(err) => {
                print_parse_error(source, &err);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let mut options = ReplayOptions::default();
    options.verbose = verbose;
    options.trim = matches.is_present("trim");
    options.index_col = matches.value_of("index-col").map(|s| s.to_string());
    options.batch_size = matches.value_of("batch-size").unwrap().parse().unwrap_or(options.batch_size);
    options.n_factor_jobs = matches.value_of("jobs").unwrap().parse().unwrap_or(1);

    let datasets: Vec<Box<dyn DatasetSource + Send>> = vec![Box::new(dataset)];
    let results = factorflow::replay(factors, predicate, datasets, options);

    for run in results {
        match run.result {
            Ok(outcome) => {
                info!("dataset {:?} replayed, {} rows", run.name, outcome.table.row_count);
                for (name, failure) in &outcome.factor_failures {
                    warn!("factor {name:?} failed: {failure}");
                }
                print_table_csv(&outcome.table);
            }
            Err(e) => eprintln!("error: dataset {:?} failed: {e}", run.name),
        }
    }
}

fn read_csv_dataset(path: &str) -> Result<InMemoryDataset, csv::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut columns: Vec<Vec<f64>> = headers.iter().map(|_| Vec::new()).collect();
    for record in reader.records() {
        let record = record?;
        for (i, field) in record.iter().enumerate() {
            columns[i].push(field.trim().parse().unwrap_or(f64::NAN));
        }
    }
    let cols = headers.into_iter().zip(columns.into_iter()).map(|(name, values)| Column::new(name, values)).collect();
    Ok(InMemoryDataset::new(path, cols))
}

fn print_table_csv(table: &factorflow::Table) {
    let header: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    println!("{}", header.join(","));
    for row in 0..table.row_count {
        let fields: Vec<String> = table.columns.iter().map(|c| c.values[row].to_string()).collect();
        println!("{}", fields.join(","));
    }
}

fn print_parse_error(source: &str, err: &ParseError) {
    let start = err.position.min(source.len());
    let end = (start + err.snippet.len().max(1)).min(source.len());
    let label = err.kind.to_string();
    let snippet = Snippet {
        title: Some(Annotation { label: Some(&label), id: None, annotation_type: AnnotationType::Error }),
        footer: vec![],
        slices: vec![Slice {
            source,
            line_start: 1,
            origin: Some("factor"),
            fold: false,
            annotations: vec![SourceAnnotation { label: "here", annotation_type: AnnotationType::Error, range: (start, end) }],
        }],
        opt: FormatOptions { color: true, ..Default::default() },
    };
    eprintln!("{}", DisplayList::from(snippet));
}
