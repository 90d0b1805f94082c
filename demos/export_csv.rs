//! Render the same results in every marketplace layout.
//!
//! ```sh
//! cargo run --example export_csv
//! ```

use stock_metadata_batch::*;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let store = ResultStore::new();
    for (name, title) in [("cat.png", "Ginger cat on a sofa"), ("dog.png", "Puppy in the snow")] {
        let item = WorkItem::ready(name, EncodedPayload::new("", "image/png"));
        store.push(ResultRecord::success(
            &item,
            GeneratedFields::Metadata(MetadataFields {
                title: title.into(),
                description: format!("{}, \"candid\" shot", title),
                keywords: vec!["pet".into(), "animal".into()],
                category: "Animals".into(),
            }),
        ))?;
    }

    let records = store.list();
    for site in StockSite::ALL {
        println!("== {} ({})", site, export::default_filename(site, export::export_mode(&records)));
        println!("{}", export::render_csv(&records, site, "jpg")?);
    }

    let dir = std::env::temp_dir();
    let path = export::write_csv(&records, StockSite::AdobeStock, "jpg", Some(&dir))?;
    println!("Wrote {}", path.display());
    Ok(())
}
