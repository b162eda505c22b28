pub mod catalog {
    use std::path::PathBuf;

    use crate::catalog::{Catalog, CatalogError, Definition};
    use crate::output;
    use crate::register_table::Family;

    /// Search and output the registers described by a catalog.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Path to the register catalog (JSON).
        #[arg(long, short = 'c')]
        catalog: PathBuf,
        /// Only list registers of this family.
        #[arg(long, value_enum)]
        family: Option<Family>,
        /// Only list registers whose name, unit or id contains this text.
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the register catalog")]
        Catalog(#[source] CatalogError),
        #[error("could not output the catalog")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct RegisterSchema<'a> {
        pub family: String,
        pub id: i32,
        pub name: &'a str,
        pub unit: &'a str,
        pub class: String,
        pub minimum: Option<i32>,
        pub maximum: Option<i32>,
    }

    impl<'a> RegisterSchema<'a> {
        const HEADERS: [&'static str; 7] = ["Family", "Id", "Name", "Unit", "Class", "Min", "Max"];

        fn new(family: Family, definition: &'a Definition) -> Self {
            Self {
                family: family.to_string(),
                id: definition.id,
                name: &definition.name,
                unit: &definition.unit,
                class: definition.class.to_string(),
                minimum: definition.minimum,
                maximum: definition.maximum,
            }
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_lowercase();
            self.name.to_lowercase().contains(&pattern)
                || self.unit.to_lowercase().contains(&pattern)
                || self.id.to_string().contains(&pattern)
        }

        fn row(&self) -> Vec<String> {
            let bound = |b: Option<i32>| b.map(|v| v.to_string()).unwrap_or_default();
            vec![
                self.family.clone(),
                self.id.to_string(),
                self.name.to_string(),
                self.unit.to_string(),
                self.class.clone(),
                bound(self.minimum),
                bound(self.maximum),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let catalog = Catalog::load(&args.catalog).map_err(Error::Catalog)?;
        let mut output = args.output.to_output().map_err(Error::Output)?;
        let families = [Family::Parameters, Family::Calculations, Family::Visibilities];
        for family in families {
            if args.family.is_some_and(|f| f != family) {
                continue;
            }
            let mut definitions = catalog.family(family).registers.iter().collect::<Vec<_>>();
            definitions.sort_by_key(|d| d.id);
            for definition in definitions {
                let schema = RegisterSchema::new(family, definition);
                if let Some(pattern) = &args.filter {
                    if !schema.is_match(pattern) {
                        continue;
                    }
                }
                output
                    .record(&RegisterSchema::HEADERS, || schema.row(), || &schema)
                    .map_err(Error::Output)?;
            }
        }
        output.commit().map_err(Error::Output)
    }
}

pub mod read {
    use std::path::PathBuf;

    use crate::catalog::{Catalog, CatalogError};
    use crate::client::Client;
    use crate::register_table::{Family, RegisterTable};
    use crate::{connection, output};

    /// Read one register table from the controller.
    #[derive(clap::Parser)]
    pub struct Args {
        #[arg(value_enum)]
        family: Family,
        /// Path to the register catalog (JSON).
        #[arg(long, short = 'c')]
        catalog: PathBuf,
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        /// Keep reading the table, once per this interval, until interrupted.
        #[arg(long)]
        watch: Option<humantime::Duration>,
        /// Only output registers whose value changed since the previous read.
        ///
        /// The first read of a `--watch` session outputs everything.
        #[arg(long)]
        changed_only: bool,
        /// Include registers the catalog does not describe.
        #[arg(long)]
        unknown: bool,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the register catalog")]
        Catalog(#[source] CatalogError),
        #[error("could not talk to the controller")]
        Connection(#[source] connection::Error),
        #[error("could not output the registers")]
        Output(#[source] output::Error),
    }

    pub async fn run(args: Args) -> Result<(), Error> {
        let catalog = Catalog::load(&args.catalog).map_err(Error::Catalog)?;
        let mut table = RegisterTable::for_family(args.family, &catalog).map_err(Error::Catalog)?;
        let mut output = args.output.clone().to_output().map_err(Error::Output)?;
        let mut client = Client::new(args.connection.endpoint().clone(), args.connection.options());
        client.connect().await.map_err(Error::Connection)?;
        let result = read_rounds(&args, &mut client, &mut table, &mut output).await;
        let closed = client.close().await.map_err(Error::Connection);
        result.and(closed)?;
        output.commit().map_err(Error::Output)
    }

    async fn read_rounds(
        args: &Args,
        client: &mut Client,
        table: &mut RegisterTable,
        output: &mut output::Output,
    ) -> Result<(), Error> {
        let mut first = true;
        let mut ticker = args.watch.map(|period| tokio::time::interval(*period));
        loop {
            if let Some(ticker) = &mut ticker {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tokio::signal::ctrl_c() => return Ok(()),
                }
            }
            client.read_from_controller(table).await.map_err(Error::Connection)?;
            for register in table.iter_sorted() {
                if !args.unknown && register.name().starts_with("unknown_") {
                    continue;
                }
                if args.changed_only && !first && !register.has_changes() {
                    continue;
                }
                output.register(register).map_err(Error::Output)?;
            }
            output.flush_batch().map_err(Error::Output)?;
            first = false;
            if ticker.is_none() {
                return Ok(());
            }
        }
    }
}

pub mod write {
    use std::path::PathBuf;

    use crate::catalog::{Catalog, CatalogError};
    use crate::client::Client;
    use crate::register_table::RegisterTable;
    use crate::registers::ConversionError;
    use crate::{connection, output};

    /// Change one parameter on the controller and read it back.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Path to the register catalog (JSON).
        #[arg(long, short = 'c')]
        catalog: PathBuf,
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        /// Name or id of the parameter.
        parameter: String,
        /// New value, in the parameter's domain representation (e.g. `-1.5`, `on`, `06:30`).
        value: String,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the register catalog")]
        Catalog(#[source] CatalogError),
        #[error("the catalog has no parameter `{0}`")]
        UnknownParameter(String),
        #[error("`{1}` cannot be written to parameter `{0}`")]
        Conversion(String, String, #[source] ConversionError),
        #[error("could not talk to the controller")]
        Connection(#[source] connection::Error),
        #[error("could not output the parameter")]
        Output(#[source] output::Error),
    }

    pub async fn run(args: Args) -> Result<(), Error> {
        let catalog = Catalog::load(&args.catalog).map_err(Error::Catalog)?;
        let mut table = RegisterTable::parameters(&catalog).map_err(Error::Catalog)?;
        let register = table
            .by_name(&args.parameter)
            .or_else(|| args.parameter.parse().ok().and_then(|id| table.get(id)))
            .ok_or_else(|| Error::UnknownParameter(args.parameter.clone()))?;
        let id = register.id();
        let conversion = |e| Error::Conversion(register.name().to_string(), args.value.clone(), e);
        let value = register.parse_value(&args.value).map_err(conversion)?;
        let raw = register.to_heat_pump(&value).map_err(conversion)?;

        let mut client = Client::new(args.connection.endpoint().clone(), args.connection.options());
        client.connect().await.map_err(Error::Connection)?;
        let written = async {
            client.write_parameter(id, raw).await?;
            client.read_parameters(&mut table).await
        }
        .await
        .map_err(Error::Connection);
        let closed = client.close().await.map_err(Error::Connection);
        written.and(closed)?;

        let mut output = args.output.to_output().map_err(Error::Output)?;
        if let Some(register) = table.get(id) {
            output.register(register).map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }
}
