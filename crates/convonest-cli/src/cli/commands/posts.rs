//! Post command handlers.

use anyhow::{Context, Result};
use comfy_table::{ContentArrangement, Table};
use convonest_core::Forum;
use convonest_core::listing::SortKey;
use convonest_core::validation::PostDraft;
use convonest_types::{Post, VoteKind};

use super::format_date;

pub async fn list(forum: &Forum, sort: SortKey, page: usize, tag: Option<&str>) -> Result<()> {
    forum.refresh_posts().await.context("fetch posts")?;

    let (posts, page, total_pages, count) = forum.with_listing(|listing| {
        listing.set_tag_filter(tag);
        listing.set_sort_key(sort);
        listing.go_to(page);
        (
            listing.visible_slice(),
            listing.page(),
            listing.total_pages(),
            listing.len(),
        )
    });

    if posts.is_empty() {
        println!("No posts found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(["ID", "Title", "Tag", "Author", "Score", "Comments", "Created"]);
    for post in &posts {
        table.add_row([
            post.id.clone(),
            post.title.clone(),
            post.tag.clone(),
            post.author_name.clone(),
            post.score().to_string(),
            post.comment_count.to_string(),
            format_date(post.created_at),
        ]);
    }
    println!("{table}");
    println!("Page {page} of {total_pages} ({count} posts, sorted by {sort})");
    Ok(())
}

pub async fn show(forum: &Forum, id: &str) -> Result<()> {
    let thread = forum
        .open_post(id)
        .await
        .with_context(|| format!("load post '{id}'"))?;
    let post = &thread.post;

    println!("{}", post.title);
    println!(
        "by {} <{}> in #{} on {}",
        post.author_name,
        post.author,
        post.tag,
        format_date(post.created_at)
    );
    println!(
        "score {} (+{} / -{}), {} comments",
        post.score(),
        post.upvoters.len(),
        post.downvoters.len(),
        post.comment_count
    );
    println!();
    println!("{}", post.body);

    if !thread.comments.is_empty() {
        println!();
        for comment in &thread.comments {
            let who = comment
                .commenter_name
                .as_deref()
                .unwrap_or(&comment.commenter);
            println!("[{}] {}: {}", format_date(comment.created_at), who, comment.body);
        }
    }
    Ok(())
}

pub async fn add(forum: &Forum, title: String, body: String, tag: String) -> Result<()> {
    let draft = PostDraft { title, body, tag };
    match forum.create_post(&draft).await? {
        Some(id) => println!("Created post {id}"),
        None => println!("Created post"),
    }
    Ok(())
}

pub async fn vote(forum: &Forum, id: &str, kind: VoteKind) -> Result<()> {
    let post = forum.vote(id, kind).await?;
    let me = forum
        .session()
        .current_principal()
        .map(|principal| principal.identifier)
        .unwrap_or_default();
    println!("{} (score {})", describe_vote(&post, &me), post.score());
    Ok(())
}

pub async fn comment(forum: &Forum, id: &str, text: &str) -> Result<()> {
    let mut thread = forum
        .open_post(id)
        .await
        .with_context(|| format!("load post '{id}'"))?;
    forum.comment(&mut thread, text).await?;
    println!(
        "Comment added to \"{}\" ({} comments)",
        thread.post.title, thread.post.comment_count
    );
    Ok(())
}

fn describe_vote(post: &Post, actor: &str) -> String {
    match post.vote_of(actor) {
        Some(VoteKind::Upvote) => format!("Upvoted \"{}\"", post.title),
        Some(VoteKind::Downvote) => format!("Downvoted \"{}\"", post.title),
        None => format!("Removed your vote on \"{}\"", post.title),
    }
}
