use cdc_stream::{ChangeRecord, MemoryStream, OperationType, Shard};
use envconfig::Envconfig;
use rand::Rng;

#[derive(Envconfig, Clone, Debug)]
pub struct DevConfig {
    #[envconfig(from = "CDC_DEV_TABLE", default = "app")]
    pub table: String,
    /// Comma separated record sources, one root shard each.
    #[envconfig(from = "CDC_DEV_SOURCES", default = "orders,users")]
    pub sources: String,
    /// Closed generations per lineage before the open leaf.
    #[envconfig(from = "CDC_DEV_GENERATIONS", default = "2")]
    pub generations: usize,
    #[envconfig(from = "CDC_DEV_RECORDS_PER_SHARD", default = "5")]
    pub records_per_shard: usize,
}

impl DevConfig {
    pub fn source_list(&self) -> Vec<String> {
        self.sources
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Builds an in-memory stream where every source owns one lineage of
/// `generations` closed shards followed by an open leaf shard.
pub fn seed_stream(conf: &DevConfig) -> MemoryStream {
    let stream_id = format!("{}/stream/dev", conf.table);
    let stream = MemoryStream::new(&conf.table, stream_id);
    let mut rng = rand::rng();
    let mut seq: u64 = 0;
    for source in conf.source_list() {
        let mut parent: Option<String> = None;
        for generation in 0..=conf.generations {
            let shard_id = format!("shard-{source}-{generation:04}");
            let shard = match &parent {
                Some(p) => Shard::with_parent(shard_id.clone(), p.clone()),
                None => Shard::new(shard_id.clone()),
            };
            stream.add_shard(shard);
            let records: Vec<ChangeRecord> = (0..conf.records_per_shard)
                .map(|_| {
                    seq += 1;
                    let operation = match rng.random_range(0..3) {
                        0 => OperationType::Insert,
                        1 => OperationType::Modify,
                        _ => OperationType::Remove,
                    };
                    let id: u32 = rng.random_range(1..1000);
                    ChangeRecord::new(operation, format!("{seq:012}"))
                        .with_key("PK", format!("{source}#{id}"))
                        .with_key("SK", "profile")
                })
                .collect();
            stream.put_records(&shard_id, records);
            if generation < conf.generations {
                stream.close_shard(&shard_id);
            }
            parent = Some(shard_id);
        }
    }
    stream
}

#[cfg(test)]
mod tests {
    use cdc_stream::{StreamSource, list_shards};

    use super::*;

    #[tokio::test]
    async fn seeds_one_lineage_per_source() {
        let conf = DevConfig {
            table: "app".into(),
            sources: "orders, users,".into(),
            generations: 2,
            records_per_shard: 3,
        };
        let stream = seed_stream(&conf);
        let stream_id = stream.latest_stream("app").await.unwrap().unwrap();
        let shards = list_shards(&stream, &stream_id, 100).await.unwrap();
        assert_eq!(shards.len(), 6);
        let roots: Vec<_> =
            shards.iter().filter(|s| s.parent_id().is_none()).collect();
        assert_eq!(roots.len(), 2);
    }
}
