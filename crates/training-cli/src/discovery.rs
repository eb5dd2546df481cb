use comfy_table::{Cell, Table};

use crate::client::JobClient;

pub async fn handle_discovery(
    client: &JobClient,
    group: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = client.discovery(group).await?;
    if entries.is_empty() {
        match group {
            Some(group) => println!("API group {group} is not served."),
            None => println!("No API groups found."),
        }
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Group", "Version", "GroupVersion"]);
    for entry in &entries {
        let group = match entry.group() {
            "" => "core",
            group => group,
        };
        table.add_row(vec![
            Cell::new(group),
            Cell::new(entry.version()),
            Cell::new(entry.group_version()),
        ]);
    }
    println!("{table}");
    Ok(())
}
