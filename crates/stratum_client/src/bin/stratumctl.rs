//! Minimal data-plane client for a Stratum cluster.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use stratum_client::{Client, ClientConfig, ColumnType, Schema, Table, Tuple, Value};

#[derive(Parser)]
#[command(name = "stratumctl")]
#[command(about = "Data-plane client for a Stratum cluster", long_about = None)]
struct Args {
    /// Target node address (host:port).
    #[arg(long, default_value = "127.0.0.1:5800")]
    target: String,
    /// Connect timeout in seconds.
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List table names known to the cluster.
    Tables,
    /// Print a table's latest schema.
    Describe {
        #[arg(long)]
        table: String,
    },
    /// Fetch a row by key. Fields are name=value pairs.
    Get {
        #[arg(long)]
        table: String,
        fields: Vec<String>,
    },
    /// Insert or overwrite a row.
    Upsert {
        #[arg(long)]
        table: String,
        fields: Vec<String>,
    },
    /// Insert a row only if its key is vacant.
    Insert {
        #[arg(long)]
        table: String,
        fields: Vec<String>,
    },
    /// Delete a row by key.
    Remove {
        #[arg(long)]
        table: String,
        fields: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ClientConfig::new(&args.target)
        .connect_timeout(Duration::from_secs(args.connect_timeout));
    let client = Client::connect(&config)
        .await
        .with_context(|| format!("connecting to {}", args.target))?;

    match args.command {
        Command::Tables => {
            for name in client.tables().names().await? {
                println!("{name}");
            }
        }
        Command::Describe { table } => {
            let table = resolve(&client, &table).await?;
            let schema = table.schema().await?;
            println!("table {} (schema version {})", table.name(), schema.version);
            for column in &schema.columns {
                println!(
                    "  {} {}{}{}",
                    column.name,
                    column.column_type.type_name(),
                    if column.key { " key" } else { "" },
                    if column.nullable { " nullable" } else { "" },
                );
            }
        }
        Command::Get { table, fields } => {
            let table = resolve(&client, &table).await?;
            let schema = table.schema().await?;
            let key = parse_fields(&schema, &fields)?;
            match table.get(None, &key).await? {
                Some(row) => print_row(&row),
                None => println!("(no row)"),
            }
        }
        Command::Upsert { table, fields } => {
            let table = resolve(&client, &table).await?;
            let schema = table.schema().await?;
            let record = parse_fields(&schema, &fields)?;
            table.upsert(None, &record).await?;
            println!("ok");
        }
        Command::Insert { table, fields } => {
            let table = resolve(&client, &table).await?;
            let schema = table.schema().await?;
            let record = parse_fields(&schema, &fields)?;
            let inserted = table.insert(None, &record).await?;
            println!("{}", if inserted { "inserted" } else { "key already taken" });
        }
        Command::Remove { table, fields } => {
            let table = resolve(&client, &table).await?;
            let schema = table.schema().await?;
            let key = parse_fields(&schema, &fields)?;
            let removed = table.remove(None, &key).await?;
            println!("{}", if removed { "removed" } else { "no such row" });
        }
    }
    Ok(())
}

async fn resolve(client: &Client, name: &str) -> anyhow::Result<Table> {
    client
        .tables()
        .table(name)
        .await?
        .ok_or_else(|| anyhow!("no such table: {name}"))
}

/// Parse `name=value` pairs, coercing each value to its column's type.
fn parse_fields(schema: &Schema, fields: &[String]) -> anyhow::Result<Tuple> {
    let mut tuple = Tuple::new();
    for field in fields {
        let Some((name, raw)) = field.split_once('=') else {
            bail!("field '{field}' is not of the form name=value");
        };
        let column = schema
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("no such column: {name}"))?;
        let value = parse_value(column.column_type, raw)
            .with_context(|| format!("parsing value for column '{name}'"))?;
        tuple.set(column.name.clone(), value);
    }
    Ok(tuple)
}

fn parse_value(column_type: ColumnType, raw: &str) -> anyhow::Result<Value> {
    if raw.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    let value = match column_type {
        ColumnType::Int8 => Value::Int8(raw.parse()?),
        ColumnType::Int16 => Value::Int16(raw.parse()?),
        ColumnType::Int32 => Value::Int32(raw.parse()?),
        ColumnType::Int64 => Value::Int64(raw.parse()?),
        ColumnType::Float => Value::Float(raw.parse()?),
        ColumnType::Double => Value::Double(raw.parse()?),
        ColumnType::Uuid => Value::Uuid(Uuid::parse_str(raw)?),
        ColumnType::String => Value::String(raw.to_owned()),
        ColumnType::Binary => Value::Binary(parse_hex(raw)?),
        ColumnType::Other(id) => bail!("column type id {id} is not supported"),
    };
    Ok(value)
}

/// Binary literals are hex strings with no 0x prefix.
fn parse_hex(raw: &str) -> anyhow::Result<Vec<u8>> {
    if raw.len() % 2 != 0 {
        bail!("hex value has odd length");
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).map_err(Into::into))
        .collect()
}

fn print_row(row: &Tuple) {
    for (name, value) in row.iter() {
        println!("{name} = {value}");
    }
}
