use crate::cli::ModelsArgs;
use crate::exit_codes;
use crate::output;
use brainchop_rs::catalog::ModelCatalog;
use serde::Serialize;

#[derive(Serialize)]
struct ModelRow<'a> {
    index: usize,
    id: u32,
    name: &'a str,
    labeled: bool,
    description: Option<&'a str>,
}

pub fn execute(args: ModelsArgs) -> i32 {
    let catalog = match ModelCatalog::load(&args.catalog) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };

    let rows: Vec<ModelRow> = catalog
        .models()
        .iter()
        .enumerate()
        .map(|(index, m)| ModelRow {
            index,
            id: m.id,
            name: &m.model_name,
            labeled: m.colormap_path.is_some(),
            description: m.description.as_deref(),
        })
        .collect();

    if args.json {
        return output::print_json(&rows);
    }

    println!("{:<6} {:<6} {:<8} Name", "Index", "Id", "Labels");
    println!("{}", "-".repeat(48));
    for row in &rows {
        println!(
            "{:<6} {:<6} {:<8} {}",
            row.index,
            row.id,
            if row.labeled { "yes" } else { "-" },
            row.name
        );
    }
    println!();
    println!("{} models", rows.len());

    exit_codes::SUCCESS
}
