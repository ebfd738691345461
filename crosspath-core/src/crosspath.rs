tonic::include_proto!("crosspath");
