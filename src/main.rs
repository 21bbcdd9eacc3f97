use clap::{Args as ClapArgs, Parser, Subcommand};
use clickhouse_loader::runner::{
    ConnectionSettings, DEFAULT_CHUNK_ROWS, DEFAULT_LOG_DIR, Dataset, DelimitedConfig, Format,
    InsertMode, LoadArgsBuilder, LoadOptionsBuilder, LoadReport, RowCountCheck, SheetSelector,
    count_rows, default_table, describe_table, init_logging, run_load, select_rows,
};
use std::path::PathBuf;

#[derive(Parser, Clone)]
#[command(about = "Load CSV, JSON, XLSX and Parquet files into ClickHouse")]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Directory for the per-run log file
    #[arg(long, global = true, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Quiet mode - only warnings on stdout, no progress bar
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the `CLICKHOUSE_*` environment settings
#[derive(ClapArgs, Clone)]
struct ConnectionArgs {
    /// ClickHouse host [env: CLICKHOUSE_HOST, default: localhost]
    #[arg(long, global = true)]
    host: Option<String>,

    /// ClickHouse HTTP port [env: CLICKHOUSE_PORT, default: 8123]
    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    user: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    #[arg(long, global = true)]
    database: Option<String>,
}

impl ConnectionArgs {
    fn resolve(self) -> anyhow::Result<ConnectionSettings> {
        let mut settings = ConnectionSettings::from_env()?;
        if let Some(host) = self.host {
            settings.host = host;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(user) = self.user {
            settings.user = user;
        }
        if let Some(password) = self.password {
            settings.password = password;
        }
        if let Some(database) = self.database {
            settings.database = database;
        }
        Ok(settings)
    }
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Load a file or a directory of files into a table
    Load {
        /// Source file or directory
        #[arg(short, long)]
        source: PathBuf,

        /// Target table name (default depends on the format, e.g. csv_table)
        #[arg(short, long)]
        table: Option<String>,

        /// File format (csv, json, xlsx, parquet) - auto-detected from extension if not specified
        #[arg(short, long)]
        format: Option<String>,

        /// Append to an existing table instead of dropping and recreating it
        #[arg(long)]
        no_drop: bool,

        /// Rows per INSERT
        #[arg(long, default_value_t = DEFAULT_CHUNK_ROWS)]
        chunk_rows: usize,

        /// Send numbers as numbers instead of stringifying every value
        #[arg(long)]
        typed_insert: bool,

        /// Compare the table's row count with the rows inserted (always on for parquet)
        #[arg(long)]
        verify: bool,

        /// CSV field delimiter
        #[arg(long, default_value = ",")]
        delimiter: String,

        /// XLSX worksheet, by position or name
        #[arg(long)]
        sheet: Option<String>,

        /// XLSX column names replacing the header row (comma separated)
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,

        /// Print the load report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the columns of a table
    Describe { table: String },

    /// Count the rows of a table
    Count { table: String },

    /// Print rows of a table
    Select {
        table: String,

        /// Columns to select (comma separated, default all)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Equality filter `column=literal`, given exactly twice. String
        /// literals need their quotes, e.g. --where "name='x'"
        #[arg(long = "where", num_args = 1)]
        filters: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_path = init_logging(&args.log_dir, args.quiet)?;
    tracing::info!("Logging to {}", log_path.display());

    let connection = args.connection.resolve()?;

    match args.command {
        Command::Load {
            source,
            table,
            format,
            no_drop,
            chunk_rows,
            typed_insert,
            verify,
            delimiter,
            sheet,
            columns,
            json,
        } => {
            let format = match format {
                Some(f) => Format::parse(&f)?,
                None => cli::detect_format(&source)?,
            };
            let table = table.unwrap_or_else(|| default_table(format).to_string());

            let options = LoadOptionsBuilder::default()
                .chunk_rows(chunk_rows)
                .insert_mode(if typed_insert {
                    InsertMode::Typed
                } else {
                    InsertMode::Text
                })
                .verify_row_count(verify || format == Format::Parquet)
                .quiet(args.quiet)
                .build()?;

            let load_args = LoadArgsBuilder::default()
                .connection(connection)
                .source(source)
                .format(format)
                .table(table)
                .drop(!no_drop)
                .delimited(DelimitedConfig::from_delimiter(&delimiter)?)
                .sheet(sheet.as_deref().map(SheetSelector::parse).unwrap_or_default())
                .column_names(columns)
                .options(options)
                .build()?;

            let report = run_load(load_args).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Command::Describe { table } => {
            for column in describe_table(&connection, &table).await? {
                println!("{}\t{}", column.name, column.clickhouse_type);
            }
        }
        Command::Count { table } => {
            println!("{}", count_rows(&connection, &table).await?);
        }
        Command::Select {
            table,
            columns,
            filters,
        } => {
            let filter = cli::parse_filters(&filters)?;
            let dataset = select_rows(&connection, &table, &columns, filter.as_ref()).await?;
            print_dataset(&dataset);
        }
    }

    Ok(())
}

fn print_report(report: &LoadReport) {
    println!();
    println!("Load Summary");
    println!("============");
    println!("Job ID: {}", report.job_id);
    println!("Table: {}", report.table);
    println!(
        "Files loaded: {} (skipped {})",
        report.files_loaded, report.files_skipped
    );
    println!("Rows inserted: {}", report.rows_inserted);
    println!("Duration: {:.2}s", report.duration.as_secs_f64());
    if let (Some(p50), Some(p90), Some(p99)) =
        (report.insert_p50_ms, report.insert_p90_ms, report.insert_p99_ms)
    {
        println!(
            "Insert latency: p50 {}ms, p90 {}ms, p99 {}ms over {} inserts",
            p50, p90, p99, report.inserts
        );
    }
    match &report.row_count_check {
        RowCountCheck::Skipped => {}
        RowCountCheck::Matched { rows } => println!("Row count verified: {}", rows),
        RowCountCheck::Mismatch { expected, actual } => {
            println!("Row count MISMATCH: expected {}, table has {}", expected, actual)
        }
    }
}

fn print_dataset(dataset: &Dataset) {
    println!("{}", dataset.column_names().join("\t"));
    for row in dataset.to_text_rows() {
        println!("{}", row.join("\t"));
    }
}

/// CLI utility functions for parsing command-line arguments
mod cli {
    use anyhow::{Context, anyhow};
    use clickhouse_loader::runner::Format;

    /// Detect the format from a file extension, or from the files of a directory
    pub fn detect_format(source: &std::path::Path) -> anyhow::Result<Format> {
        if source.is_dir() {
            let mut found = None;
            for entry in std::fs::read_dir(source)
                .with_context(|| format!("Failed to list directory {}", source.display()))?
            {
                if let Some(format) = Format::from_path(&entry?.path()) {
                    if found.is_some_and(|f| f != format) {
                        return Err(anyhow!(
                            "Directory {} holds several formats.\n\
                             Please specify --format explicitly.",
                            source.display()
                        ));
                    }
                    found = Some(format);
                }
            }
            return found.ok_or_else(|| {
                anyhow!(
                    "No csv, json, xlsx or parquet files in {}",
                    source.display()
                )
            });
        }

        Format::from_path(source).ok_or_else(|| {
            anyhow!(
                "Could not detect format from file '{}'.\n\
                 Supported extensions: .csv, .json, .xlsx, .parquet\n\
                 Please specify --format explicitly.",
                source.display()
            )
        })
    }

    /// Parse two `column=literal` filters
    pub fn parse_filters(raw: &[String]) -> anyhow::Result<Option<[(String, String); 2]>> {
        if raw.is_empty() {
            return Ok(None);
        }

        let parsed = raw
            .iter()
            .map(|pair| {
                let (column, value) = pair.split_once('=').ok_or_else(|| {
                    anyhow!("Invalid filter '{}'. Expected format: column=literal", pair)
                })?;
                let column = column.trim();
                if column.is_empty() {
                    return Err(anyhow!("Column name cannot be empty in filter '{}'", pair));
                }
                Ok((column.to_string(), value.trim().to_string()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let pair: [(String, String); 2] = parsed
            .try_into()
            .map_err(|v: Vec<_>| anyhow!("Expected exactly 2 --where filters, got {}", v.len()))?;
        Ok(Some(pair))
    }

}
