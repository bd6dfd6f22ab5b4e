//! `attest order ...` against the Postgres store.

use anyhow::{bail, Context, Result};
use clap::Args;

use attest_orders::{NewOrder, OrderFilter, OrderSelector, ProviderFilter};
use attest_schemas::{Address, DeviceAddress};

use super::{lifecycle_from_env, load_settings, parse_data, print_order};
use crate::OrderCmd;

/// How `bind` / `unbind` name their order. Exactly one of `--id`,
/// `--device` or `--data` is expected; `--provider` qualifies `--data`.
#[derive(Debug, Clone, Args)]
pub struct Target {
    #[arg(long, conflicts_with_all = ["device", "data"])]
    pub id: Option<i64>,

    #[arg(long, conflicts_with = "data")]
    pub device: Option<String>,

    /// Attribute pair key=value (repeatable)
    #[arg(long = "data")]
    pub data: Vec<String>,

    #[arg(long)]
    pub provider: Option<String>,
}

impl Target {
    fn selector(&self, settings: &attest_config::Settings) -> Result<OrderSelector> {
        if let Some(id) = self.id {
            return Ok(OrderSelector::Id(id));
        }
        if let Some(d) = &self.device {
            return Ok(OrderSelector::Device(
                DeviceAddress::parse(d).context("invalid --device")?,
            ));
        }
        if !self.data.is_empty() {
            return Ok(OrderSelector::Data {
                provider: settings
                    .deployment
                    .effective_provider(self.provider.as_deref()),
                data: parse_data(&self.data, settings)?,
            });
        }
        bail!("one of --id, --device or --data is required")
    }
}

pub(crate) async fn run(cmd: OrderCmd) -> Result<()> {
    let settings = load_settings()?;
    let lifecycle = lifecycle_from_env(&settings).await?;

    match cmd {
        OrderCmd::Create {
            data,
            provider,
            address,
            device,
            allow_duplicates,
        } => {
            let mut new = NewOrder::new(
                settings.deployment.effective_provider(provider.as_deref()),
                parse_data(&data, &settings)?,
            );
            if let Some(a) = address {
                new.address = Some(Address::parse(&a).context("invalid --address")?);
            }
            if let Some(d) = device {
                new.device = Some(DeviceAddress::parse(&d).context("invalid --device")?);
            }
            let out = lifecycle.create_order(new, allow_duplicates).await?;
            println!("order_id={} created={}", out.id, out.created);
        }

        OrderCmd::Show { id } => print_order(&lifecycle.get_order(id).await?),

        OrderCmd::List {
            provider,
            device,
            open_only,
        } => {
            let filter = OrderFilter {
                provider: match provider {
                    Some(p) => ProviderFilter::Named(p),
                    None => ProviderFilter::Any,
                },
                device: device
                    .map(|d| DeviceAddress::parse(&d))
                    .transpose()
                    .context("invalid --device")?,
                exclude_attested: open_only,
                ..OrderFilter::default()
            };
            let orders = lifecycle.find_orders(&filter).await?;
            for o in &orders {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    o.id,
                    o.status.as_str(),
                    o.provider.as_deref().unwrap_or("-"),
                    o.data.canonical_json(),
                    o.unit.as_ref().map(|u| u.as_str()).unwrap_or("-"),
                );
            }
            println!("count={}", orders.len());
        }

        OrderCmd::Bind { target, address } => {
            let address = Address::parse(&address).context("invalid --address")?;
            let o = lifecycle
                .bind_address(&target.selector(&settings)?, &address)
                .await?;
            println!("bound=true order_id={} status={}", o.id, o.status.as_str());
        }

        OrderCmd::Unbind { target } => {
            let o = lifecycle.unbind_address(&target.selector(&settings)?).await?;
            println!("unbound=true order_id={} status={}", o.id, o.status.as_str());
        }

        OrderCmd::SetDevice { id, device } => {
            let device = DeviceAddress::parse(&device).context("invalid --device")?;
            let o = lifecycle.rebind_device_address(id, &device).await?;
            println!("order_id={} device_address={}", o.id, device);
        }
    }

    Ok(())
}
