//! This module provides [compute_groups], which clusters photos into bursts by capture time, plus the handlers
//! for the burst-related endpoints.

#![deny(warnings)]

use {
    crate::store::{GroupNameStore, PhotoStore},
    anyhow::Result,
    burst_shared::{GroupName, GroupNames, GroupedPhoto, GroupedPhotosResponse, PhotoRecord},
    chrono::{Duration, NaiveDateTime},
};

/// Maximum number of seconds between a photo and the previous photo of the same burst
pub const BURST_GAP_SECONDS: i64 = 10;

/// Cluster `records` into bursts.
///
/// Records without a parseable `date_taken` are ignored.  The rest are sorted by capture time (ties keep their
/// input order) and swept once: a photo joins the current burst if it was taken no more than
/// [BURST_GAP_SECONDS] after the burst's latest photo, and starts a new burst otherwise.  Since each photo is
/// compared against its predecessor rather than the first photo of the burst, a burst may span more than
/// [BURST_GAP_SECONDS] in total.
///
/// The position of a burst in the result is its group index.
pub fn compute_groups<'a>(
    records: impl IntoIterator<Item = (&'a String, &'a PhotoRecord)>,
) -> Vec<Vec<GroupedPhoto>> {
    let mut photos = records
        .into_iter()
        .filter_map(|(filename, record)| {
            record
                .date_taken
                .as_deref()
                .and_then(burst_shared::parse_date_taken)
                .map(|datetime| (filename.as_str(), datetime))
        })
        .collect::<Vec<_>>();

    photos.sort_by_key(|&(_, datetime)| datetime);

    let max_gap = Duration::seconds(BURST_GAP_SECONDS);

    let mut groups = Vec::<Vec<(&str, NaiveDateTime)>>::new();

    for (filename, datetime) in photos {
        match groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .map(|&(_, previous)| datetime - previous <= max_gap)
                    .unwrap_or(false) =>
            {
                group.push((filename, datetime))
            }

            _ => groups.push(vec![(filename, datetime)]),
        }
    }

    groups
        .into_iter()
        .map(|group| {
            group
                .into_iter()
                .map(|(filename, datetime)| GroupedPhoto {
                    filename: filename.to_owned(),
                    date_taken: burst_shared::format_date_taken(&datetime),
                })
                .collect()
        })
        .collect()
}

/// Handle a GET /grouped_photos request.
pub async fn grouped_photos(photos: &PhotoStore) -> Result<GroupedPhotosResponse> {
    Ok(GroupedPhotosResponse {
        groups: compute_groups(&photos.get_all().await?),
    })
}

/// Recompute the bursts from the current contents of `photos` and drop any names whose index no longer exists.
pub async fn prune_group_names(photos: &PhotoStore, names: &GroupNameStore) -> Result<usize> {
    let count = compute_groups(&photos.get_all().await?).len();

    names.prune(count).await
}

/// Handle a GET /group_names request.
pub async fn group_names(names: &GroupNameStore) -> Result<GroupNames> {
    names.get_all().await
}

/// Handle a POST /set_group_name request, echoing the accepted name back.
///
/// The index is not checked against the current bursts; a name for an index which does not exist yet is kept
/// until the next deletion prunes it.
pub async fn set_group_name(names: &GroupNameStore, group: GroupName) -> Result<GroupName> {
    names.set(group.group_idx, &group.name).await?;

    Ok(group)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::store::Photos,
        burst_shared::Ranking,
        maplit::btreemap,
    };

    fn record(date_taken: Option<&str>) -> PhotoRecord {
        PhotoRecord {
            date_taken: date_taken.map(str::to_owned),
            ranking: Ranking::default(),
        }
    }

    fn filenames(groups: &[Vec<GroupedPhoto>]) -> Vec<Vec<&str>> {
        groups
            .iter()
            .map(|group| group.iter().map(|photo| photo.filename.as_str()).collect())
            .collect()
    }

    #[test]
    fn example() {
        let photos: Photos = btreemap! {
            "d.jpg".to_string() => record(Some("2021:07:04 10:05:00")),
            "a.jpg".to_string() => record(Some("2021:07:04 10:00:00")),
            "c.jpg".to_string() => record(Some("2021:07:04 10:00:20")),
            "b.jpg".to_string() => record(Some("2021:07:04 10:00:05")),
        };

        let groups = compute_groups(&photos);

        assert_eq!(
            filenames(&groups),
            vec![vec!["a.jpg", "b.jpg"], vec!["c.jpg"], vec!["d.jpg"]]
        );

        assert_eq!(
            groups[0],
            vec![
                GroupedPhoto {
                    filename: "a.jpg".into(),
                    date_taken: "2021:07:04 10:00:00".into()
                },
                GroupedPhoto {
                    filename: "b.jpg".into(),
                    date_taken: "2021:07:04 10:00:05".into()
                },
            ]
        );

        // Same input, same output.

        assert_eq!(compute_groups(&photos), groups);
    }

    #[test]
    fn chained() {
        // Each step is within the gap, so all of these form one burst even though it spans 40 seconds.

        let photos: Photos = (0..5)
            .map(|n| {
                (
                    format!("{}.jpg", n),
                    record(Some(format!("2021:07:04 10:00:{:02}", n * 10).as_str())),
                )
            })
            .collect();

        assert_eq!(
            filenames(&compute_groups(&photos)),
            vec![vec!["0.jpg", "1.jpg", "2.jpg", "3.jpg", "4.jpg"]]
        );
    }

    #[test]
    fn boundary() {
        let photos: Photos = btreemap! {
            "a.jpg".to_string() => record(Some("2021:07:04 23:59:55")),
            "b.jpg".to_string() => record(Some("2021:07:05 00:00:05")),
            "c.jpg".to_string() => record(Some("2021:07:05 00:00:16")),
        };

        // Exactly ten seconds (across midnight) stays together; eleven does not.

        assert_eq!(
            filenames(&compute_groups(&photos)),
            vec![vec!["a.jpg", "b.jpg"], vec!["c.jpg"]]
        );
    }

    #[test]
    fn ties() {
        let photos: Photos = btreemap! {
            "b.jpg".to_string() => record(Some("2021:07:04 10:00:00")),
            "a.jpg".to_string() => record(Some("2021:07:04 10:00:00")),
        };

        assert_eq!(
            filenames(&compute_groups(&photos)),
            vec![vec!["a.jpg", "b.jpg"]]
        );
    }

    #[test]
    fn unusable_timestamps() {
        assert!(compute_groups(&Photos::new()).is_empty());

        let photos: Photos = btreemap! {
            "none.jpg".to_string() => record(None),
            "bad.jpg".to_string() => record(Some("yesterday")),
            "dashes.jpg".to_string() => record(Some("2021-07-04 10:00:00")),
            "only.jpg".to_string() => record(Some("2021:07:04 10:00:00")),
        };

        assert_eq!(filenames(&compute_groups(&photos)), vec![vec!["only.jpg"]]);
    }

    #[test]
    fn gaps() {
        let timestamps = [
            "2021:07:04 10:00:00",
            "2021:07:04 10:00:03",
            "2021:07:04 10:00:14",
            "2021:07:04 10:00:24",
            "2021:07:04 10:01:00",
            "2021:07:04 10:01:00",
            "2021:07:04 10:01:11",
            "2021:07:05 08:00:00",
        ];

        let photos: Photos = timestamps
            .iter()
            .enumerate()
            .map(|(n, timestamp)| (format!("{}.jpg", n), record(Some(*timestamp))))
            .collect();

        let groups = compute_groups(&photos);

        let parse = |photo: &GroupedPhoto| burst_shared::parse_date_taken(&photo.date_taken).unwrap();

        for group in &groups {
            for pair in group.windows(2) {
                assert!(parse(&pair[1]) - parse(&pair[0]) <= Duration::seconds(BURST_GAP_SECONDS));
            }
        }

        for pair in groups.windows(2) {
            let last = pair[0].last().unwrap();
            let first = pair[1].first().unwrap();

            assert!(parse(first) - parse(last) > Duration::seconds(BURST_GAP_SECONDS));
        }

        assert_eq!(groups.iter().map(Vec::len).sum::<usize>(), timestamps.len());
        assert_eq!(groups.len(), 5);
    }
}
