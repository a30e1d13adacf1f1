//! Tags and announcements.

use anyhow::Result;
use comfy_table::{ContentArrangement, Table};
use convonest_core::Forum;
use convonest_core::validation::AnnouncementDraft;

use super::format_date;

pub async fn tags(forum: &Forum) -> Result<()> {
    let tags = forum.tags().await?;
    if tags.is_empty() {
        println!("No tags found.");
    } else {
        for tag in tags {
            println!("{}", tag.name);
        }
    }
    Ok(())
}

pub async fn announcements(forum: &Forum) -> Result<()> {
    let announcements = forum.announcements().await?;
    if announcements.is_empty() {
        println!("No announcements.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(["Date", "Title", "Author", "Description"]);
    for announcement in announcements {
        table.add_row([
            format_date(announcement.created_at),
            announcement.title,
            announcement.author_name,
            announcement.description,
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn add_announcement(forum: &Forum, title: String, description: String) -> Result<()> {
    let draft = AnnouncementDraft { title, description };
    match forum.create_announcement(&draft).await? {
        Some(id) => println!("Published announcement {id}"),
        None => println!("Published announcement"),
    }
    Ok(())
}
